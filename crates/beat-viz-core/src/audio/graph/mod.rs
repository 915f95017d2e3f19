//! Audio graph context.
//!
//! Sources never talk to a global audio device. They receive a [`SharedContext`]
//! and build their node chains through the [`AudioContext`] trait, which keeps
//! the graph swappable and lets tests drive the clock by rendering audio.

mod analyser;
mod convolver;
mod param;
mod software;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::GraphError;

pub use software::SoftwareGraph;

/// Frames processed per render quantum
pub const RENDER_QUANTUM: usize = 128;

/// Default analyser transform size
pub const DEFAULT_FFT_SIZE: usize = 2048;

/// Default analyser temporal smoothing
pub const DEFAULT_SMOOTHING_TIME_CONSTANT: f32 = 0.8;

/// Handle to a node inside an audio context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Oscillator shapes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// Sample the waveform at `phase` in [0, 1)
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * std::f32::consts::TAU).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Decoded mono PCM audio at a fixed sample rate
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: f32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: f32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A buffer of `seconds` of silence
    pub fn silent(seconds: f64, sample_rate: f32) -> Self {
        let len = (seconds * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Live samples pushed by a capture thread and pulled by the graph.
///
/// The backlog is capped so a stalled consumer never builds up latency.
#[derive(Clone, Default)]
pub struct LiveBuffer {
    inner: Arc<Mutex<VecDeque<f32>>>,
}

/// Maximum number of queued live samples (~0.2s at 44.1kHz)
const LIVE_BACKLOG: usize = 8192;

impl LiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append captured mono samples, dropping the oldest ones past the backlog cap
    pub fn push_samples(&self, samples: &[f32]) {
        let mut queue = self.inner.lock();
        queue.extend(samples.iter().copied());
        let excess = queue.len().saturating_sub(LIVE_BACKLOG);
        if excess > 0 {
            queue.drain(..excess);
        }
    }

    /// Fill `out` with queued samples, zero-filling on underrun
    pub fn pull_into(&self, out: &mut [f32]) {
        let mut queue = self.inner.lock();
        for slot in out.iter_mut() {
            *slot = queue.pop_front().unwrap_or(0.0);
        }
    }

    pub fn queued(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl fmt::Debug for LiveBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveBuffer")
            .field("queued", &self.queued())
            .finish()
    }
}

/// Everything needed to create a node
#[derive(Clone, Debug)]
pub enum NodeSpec {
    /// Pass-through tap exposing frequency and time-domain bytes
    Analyser { fft_size: usize, smoothing: f32 },
    /// Scales its input by an automatable gain
    Gain { gain: f32 },
    /// Plays a decoded buffer once started
    BufferSource { buffer: Arc<AudioBuffer> },
    /// Streams samples from a capture thread
    LiveInput { buffer: LiveBuffer },
    /// Periodic waveform generator
    Oscillator { waveform: Waveform, frequency: f32 },
    /// Convolution reverb with the given impulse response
    Convolver { impulse: Arc<AudioBuffer> },
}

/// Automation events on a node's primary parameter (gain for gain nodes)
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamEvent {
    /// Jump to `value` at time `at`
    SetValue { value: f32, at: f64 },
    /// Ramp linearly from the previous event to `value`, arriving at `end`
    LinearRamp { value: f32, end: f64 },
    /// Remove every event scheduled at or after `at`
    CancelFrom { at: f64 },
}

/// Lifecycle of an audio context
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// Operations sources and the manager need from an audio context.
///
/// Times are in seconds on the context clock (`current_time`).
pub trait AudioContext: Send {
    fn sample_rate(&self) -> f32;

    /// Seconds of audio rendered so far; frozen while suspended
    fn current_time(&self) -> f64;

    fn state(&self) -> ContextState;

    fn resume(&mut self) -> Result<(), GraphError>;

    /// The node whose output is the audible output
    fn destination(&self) -> NodeId;

    /// Release every node and stop rendering for good
    fn close(&mut self);

    fn create_node(&mut self, spec: NodeSpec) -> Result<NodeId, GraphError>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError>;

    /// Remove every outgoing connection of `node`
    fn disconnect(&mut self, node: NodeId) -> Result<(), GraphError>;

    /// Drop a node, disconnecting it from everything
    fn release(&mut self, node: NodeId) -> Result<(), GraphError>;

    /// Start a buffer source or oscillator at `when`, `offset` seconds into the buffer
    fn start_node(&mut self, node: NodeId, when: f64, offset: f64) -> Result<(), GraphError>;

    fn stop_node(&mut self, node: NodeId, when: f64) -> Result<(), GraphError>;

    /// True once a scheduled node has stopped producing audio
    fn is_finished(&self, node: NodeId) -> bool;

    fn schedule(&mut self, node: NodeId, event: ParamEvent) -> Result<(), GraphError>;

    /// Primary parameter value at the current time
    fn param_value(&self, node: NodeId) -> Result<f32, GraphError>;

    fn frequency_bin_count(&self, node: NodeId) -> Result<usize, GraphError>;

    fn byte_frequency_data(&mut self, node: NodeId, out: &mut [u8]) -> Result<(), GraphError>;

    fn byte_time_domain_data(&self, node: NodeId, out: &mut [u8]) -> Result<(), GraphError>;

    /// Render mono output into `out`, advancing the clock by whole quanta
    fn render(&mut self, out: &mut [f32]);
}

/// Context shared between the frame loop and the audio output thread
pub type SharedContext = Arc<Mutex<dyn AudioContext>>;

/// Wrap a concrete context for sharing
pub fn share<C: AudioContext + 'static>(context: C) -> Arc<Mutex<C>> {
    Arc::new(Mutex::new(context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_buffer_underrun_zero_fills() {
        let live = LiveBuffer::new();
        live.push_samples(&[0.5, -0.5]);

        let mut out = [1.0; 4];
        live.pull_into(&mut out);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_live_buffer_caps_backlog() {
        let live = LiveBuffer::new();
        live.push_samples(&vec![0.1; LIVE_BACKLOG + 100]);
        assert_eq!(live.queued(), LIVE_BACKLOG);
    }

    #[test]
    fn test_waveform_ranges() {
        for waveform in [
            Waveform::Sine,
            Waveform::Square,
            Waveform::Sawtooth,
            Waveform::Triangle,
        ] {
            for i in 0..100 {
                let s = waveform.sample(i as f32 / 100.0);
                assert!((-1.0..=1.0).contains(&s), "{:?} out of range: {}", waveform, s);
            }
        }
    }

    #[test]
    fn test_silent_buffer_duration() {
        let buffer = AudioBuffer::silent(10.0, 44100.0);
        assert_eq!(buffer.len(), 441_000);
        assert!((buffer.duration() - 10.0).abs() < 1e-9);
    }
}
