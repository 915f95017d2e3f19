//! Error types for the audio graph and audio sources

use thiserror::Error;

use crate::audio::graph::NodeId;

/// Audio graph errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Node was never created or has already been released
    #[error("unknown audio node {0}")]
    UnknownNode(NodeId),

    /// Operation does not apply to this kind of node
    #[error("node {0} does not support {1}")]
    Unsupported(NodeId, &'static str),

    /// Context was closed and cannot create or run nodes
    #[error("audio context is closed")]
    Closed,

    /// Analyser transform size outside the supported range
    #[error("invalid fft size {0}: must be a power of two between 32 and 32768")]
    InvalidFftSize(usize),
}

/// Audio source errors, surfaced to whoever asked for the source to start
#[derive(Error, Debug)]
pub enum SourceError {
    /// Required resource (decoded buffer, device) is missing
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Audio bytes could not be decoded
    #[error("failed to decode audio: {0}")]
    Decode(String),

    /// Input device access was refused
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Device enumeration or stream creation failed
    #[error("audio device error: {0}")]
    Device(String),

    /// Analysis requested before a source was attached
    #[error("no audio source attached")]
    NoSource,

    /// Note name is not part of the twelve-tone table
    #[error("unknown note '{0}'")]
    UnknownNote(String),

    /// Manager was destroyed and can no longer be used
    #[error("audio manager has been destroyed")]
    Destroyed,

    /// Underlying graph operation failed
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Result type for source operations
pub type Result<T> = std::result::Result<T, SourceError>;
