//! Playback of the software audio graph through the default output device.

use std::time::Duration;

use anyhow::{anyhow, Context};
use beat_viz_core::audio::graph::{SharedContext, RENDER_QUANTUM};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tracing::{error, info};

/// Default output device and the config the graph has to render at
pub struct OutputDevice {
    device: Device,
    config: StreamConfig,
}

impl OutputDevice {
    pub fn default_device() -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"))?;
        let supported = device
            .default_output_config()
            .context("querying default output config")?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(anyhow!(
                "output device wants {:?} samples, only f32 is supported",
                supported.sample_format()
            ));
        }

        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let config: StreamConfig = supported.into();
        info!(device = %name, rate = config.sample_rate.0, channels = config.channels, "output device");

        Ok(Self { device, config })
    }

    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate.0 as f32
    }

    /// Start pulling the graph from the audio thread. Mono output is copied
    /// to every channel. Dropping the stream stops playback.
    pub fn play(&self, context: SharedContext) -> anyhow::Result<Stream> {
        let channels = self.config.channels as usize;
        let mut mono = Vec::new();
        let mut quanta = QuantumBuffer::new(context);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    mono.resize(frames, 0.0);
                    quanta.fill(&mut mono);
                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill(sample);
                    }
                },
                |err| error!(error = %err, "output stream error"),
                None,
            )
            .context("building output stream")?;
        stream.play().context("starting output stream")?;
        Ok(stream)
    }
}

/// Adapts arbitrary callback sizes to whole render quanta, carrying the
/// unplayed tail of the last quantum into the next callback.
struct QuantumBuffer {
    context: SharedContext,
    block: [f32; RENDER_QUANTUM],
    cursor: usize,
}

impl QuantumBuffer {
    fn new(context: SharedContext) -> Self {
        Self {
            context,
            block: [0.0; RENDER_QUANTUM],
            cursor: RENDER_QUANTUM,
        }
    }

    fn fill(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.cursor == RENDER_QUANTUM {
                self.context.lock().render(&mut self.block);
                self.cursor = 0;
            }
            let n = (RENDER_QUANTUM - self.cursor).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.block[self.cursor..self.cursor + n]);
            self.cursor += n;
            written += n;
        }
    }
}

/// Drives the graph from the frame loop when no output stream pulls it.
///
/// Only whole quanta are rendered; the fractional remainder carries over so
/// the context clock tracks wall time.
#[derive(Default)]
pub struct SilentClock {
    pending_frames: f64,
    scratch: Vec<f32>,
}

impl SilentClock {
    pub fn advance(&mut self, context: &SharedContext, elapsed: Duration) {
        let mut context = context.lock();
        self.pending_frames += elapsed.as_secs_f64() * context.sample_rate() as f64;
        let quanta = (self.pending_frames / RENDER_QUANTUM as f64).floor();
        if quanta < 1.0 {
            return;
        }
        self.pending_frames -= quanta * RENDER_QUANTUM as f64;
        self.scratch.resize(quanta as usize * RENDER_QUANTUM, 0.0);
        context.render(&mut self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beat_viz_core::audio::graph::{share, AudioContext, NodeSpec, SoftwareGraph};

    #[test]
    fn test_quantum_buffer_carries_partial_blocks() {
        let graph = share(SoftwareGraph::new(8000.0));
        {
            let mut g = graph.lock();
            g.resume().unwrap();
            let dest = g.destination();
            let osc = g
                .create_node(NodeSpec::Oscillator {
                    waveform: Default::default(),
                    frequency: 440.0,
                })
                .unwrap();
            g.connect(osc, dest).unwrap();
            g.start_node(osc, 0.0, 0.0).unwrap();
        }
        let context: SharedContext = graph.clone();
        let mut quanta = QuantumBuffer::new(context);

        // 100 + 100 frames span two quanta without dropping samples
        let mut first = vec![0.0; 100];
        let mut second = vec![0.0; 100];
        quanta.fill(&mut first);
        quanta.fill(&mut second);

        let rendered = graph.lock().current_time() * 8000.0;
        assert_eq!(rendered.round() as usize, 2 * RENDER_QUANTUM);
        assert_eq!(quanta.cursor, 200 - RENDER_QUANTUM);
        assert!(second.iter().any(|s| s.abs() > 0.0));
    }

    #[test]
    fn test_silent_clock_tracks_wall_time() {
        let graph = share(SoftwareGraph::new(44100.0));
        graph.lock().resume().unwrap();
        let context: SharedContext = graph.clone();

        let mut clock = SilentClock::default();
        for _ in 0..180 {
            clock.advance(&context, Duration::from_secs_f64(1.0 / 60.0));
        }

        let quantum = RENDER_QUANTUM as f64 / 44100.0;
        let now = graph.lock().current_time();
        assert!(now <= 3.0 + 1e-9);
        assert!(3.0 - now < quantum);
    }
}
