//! Audio sources feeding the analyzer.
//!
//! Every source owns an analyser tap and a volume gain inside the shared audio
//! context. [`SourceGraph`] holds that common wiring; the variants only add
//! their own input nodes.

mod file;
mod keyboard;
mod microphone;

use std::fmt;

use tracing::trace;

use super::analyzer::AnalyzerTap;
use super::graph::{NodeId, NodeSpec, ParamEvent, SharedContext};
use crate::config::AnalyzerConfig;
use crate::error::Result;

pub use file::FileSource;
pub use keyboard::{note_frequency, Envelope, KeyboardSource};
pub use microphone::{InputDevice, InputDevices, MicrophoneSource, VolumeLevels};

/// Which kind of source is attached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceType {
    File,
    Microphone,
    Keyboard,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::File => "file",
            SourceType::Microphone => "microphone",
            SourceType::Keyboard => "keyboard",
        };
        f.write_str(name)
    }
}

/// Capabilities shared by every source
pub trait AudioSource {
    /// Begin producing audio, replacing any playback already running
    fn start(&mut self) -> Result<()>;

    /// Tear down the input node; safe to call when already stopped
    fn stop(&mut self);

    fn is_ready(&self) -> bool;

    fn is_active(&self) -> bool;

    fn analyzer_tap(&self) -> &AnalyzerTap;

    /// Set output gain, negative levels clamp to zero
    fn set_volume(&mut self, level: f32);

    fn volume(&self) -> f32;
}

/// Where the tap's output goes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Routing {
    /// tap -> gain -> destination
    ToOutput,
    /// The tap is a dead end, nothing reaches the speakers
    AnalysisOnly,
}

/// Analyser tap plus volume gain, shared by all source variants
pub(crate) struct SourceGraph {
    context: SharedContext,
    tap: AnalyzerTap,
    gain: NodeId,
    volume: f32,
}

impl SourceGraph {
    pub fn new(context: SharedContext, config: &AnalyzerConfig, routing: Routing) -> Result<Self> {
        let (analyser, gain) = {
            let mut ctx = context.lock();
            let analyser = ctx.create_node(NodeSpec::Analyser {
                fft_size: config.fft_size(),
                smoothing: config.smoothing_time_constant(),
            })?;
            let gain = ctx.create_node(NodeSpec::Gain { gain: 1.0 })?;
            if routing == Routing::ToOutput {
                let destination = ctx.destination();
                ctx.connect(analyser, gain)?;
                ctx.connect(gain, destination)?;
            }
            (analyser, gain)
        };

        Ok(Self {
            tap: AnalyzerTap::new(context.clone(), analyser),
            context,
            gain,
            volume: 1.0,
        })
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn tap(&self) -> &AnalyzerTap {
        &self.tap
    }

    pub fn now(&self) -> f64 {
        self.context.lock().current_time()
    }

    pub fn resume(&self) -> Result<()> {
        self.context.lock().resume()?;
        Ok(())
    }

    /// Feed `input` into the analyser tap
    pub fn attach(&self, input: NodeId) -> Result<()> {
        self.context.lock().connect(input, self.tap.node())?;
        Ok(())
    }

    /// Disconnect and drop an input node, ignoring nodes already gone
    pub fn detach(&self, input: NodeId) {
        if let Err(e) = self.context.lock().release(input) {
            trace!(node = %input, error = %e, "input already released");
        }
    }

    pub fn set_volume(&mut self, level: f32) {
        self.volume = level.max(0.0);
        let mut ctx = self.context.lock();
        let at = ctx.current_time();
        let event = ParamEvent::SetValue {
            value: self.volume,
            at,
        };
        if let Err(e) = ctx.schedule(self.gain, event) {
            trace!(error = %e, "volume change on released gain");
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl Drop for SourceGraph {
    fn drop(&mut self) {
        let mut ctx = self.context.lock();
        for node in [self.tap.node(), self.gain] {
            if let Err(e) = ctx.release(node) {
                trace!(node = %node, error = %e, "source node already released");
            }
        }
    }
}

/// One of the three source variants
pub enum Source {
    File(FileSource),
    Microphone(MicrophoneSource),
    Keyboard(KeyboardSource),
}

impl Source {
    pub fn source_type(&self) -> SourceType {
        match self {
            Source::File(_) => SourceType::File,
            Source::Microphone(_) => SourceType::Microphone,
            Source::Keyboard(_) => SourceType::Keyboard,
        }
    }

    /// Pause file playback in place; live sources have no position so they stop
    pub fn pause(&mut self) {
        match self {
            Source::File(file) => file.pause(),
            other => other.stop(),
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileSource> {
        match self {
            Source::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_microphone_mut(&mut self) -> Option<&mut MicrophoneSource> {
        match self {
            Source::Microphone(mic) => Some(mic),
            _ => None,
        }
    }

    pub fn as_keyboard_mut(&mut self) -> Option<&mut KeyboardSource> {
        match self {
            Source::Keyboard(keyboard) => Some(keyboard),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn AudioSource {
        match self {
            Source::File(s) => s,
            Source::Microphone(s) => s,
            Source::Keyboard(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn AudioSource {
        match self {
            Source::File(s) => s,
            Source::Microphone(s) => s,
            Source::Keyboard(s) => s,
        }
    }
}

impl AudioSource for Source {
    fn start(&mut self) -> Result<()> {
        self.inner_mut().start()
    }

    fn stop(&mut self) {
        self.inner_mut().stop()
    }

    fn is_ready(&self) -> bool {
        self.inner().is_ready()
    }

    fn is_active(&self) -> bool {
        self.inner().is_active()
    }

    fn analyzer_tap(&self) -> &AnalyzerTap {
        self.inner().analyzer_tap()
    }

    fn set_volume(&mut self, level: f32) {
        self.inner_mut().set_volume(level)
    }

    fn volume(&self) -> f32 {
        self.inner().volume()
    }
}

impl From<FileSource> for Source {
    fn from(source: FileSource) -> Self {
        Source::File(source)
    }
}

impl From<MicrophoneSource> for Source {
    fn from(source: MicrophoneSource) -> Self {
        Source::Microphone(source)
    }
}

impl From<KeyboardSource> for Source {
    fn from(source: KeyboardSource) -> Self {
        Source::Keyboard(source)
    }
}
