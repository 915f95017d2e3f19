//! Audio side: the graph, sources, analysis and the frame-driven manager.

pub mod analyzer;
pub mod decode;
pub mod graph;
pub mod manager;
pub mod scheduler;
pub mod source;

pub use analyzer::{AnalysisFrame, AnalyzerEngine, AnalyzerTap};
pub use decode::decode_audio_data;
pub use manager::{AudioManager, AudioManagerState, SubscriptionId};
pub use scheduler::{FrameId, FrameQueue, FrameScheduler};
pub use source::{
    AudioSource, FileSource, InputDevice, InputDevices, KeyboardSource, MicrophoneSource, Source,
    SourceType,
};
