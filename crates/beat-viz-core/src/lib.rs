//! Core of the beat-viz music visualizer.
//!
//! Audio sources feed a software audio graph, the analyzer turns each frame
//! into features and the visualization engines paint them onto a surface.
//! Nothing here touches windows or devices; the host crate wires those in.

pub mod audio;
pub mod config;
pub mod error;
pub mod renderer;

pub use audio::{
    AnalysisFrame, AnalyzerEngine, AudioManager, AudioManagerState, AudioSource, FrameQueue,
    FrameScheduler, Source, SourceType,
};
pub use config::{AnalyzerConfig, SynthConfig};
pub use error::{GraphError, SourceError};
pub use renderer::{
    RenderDriver, SettingsPatch, Surface, VisualizationEngine, VisualizationSettings,
    VisualizationType,
};
