//! Input device capture using cpal.
//!
//! cpal streams cannot leave the thread that built them on every platform, so
//! each open device lives on its own capture thread. Opening waits for that
//! thread to report success, bounded by the configured device timeout (the
//! config call often hangs on bad devices).

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use beat_viz_core::audio::graph::LiveBuffer;
use beat_viz_core::audio::{InputDevice, InputDevices};
use beat_viz_core::error::{Result, SourceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use tracing::{debug, info, warn};

struct Capture {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Capture devices of the default cpal host, resampled to `target_rate`
pub struct CpalInputs {
    target_rate: f32,
    timeout: Duration,
    capture: Option<Capture>,
}

impl CpalInputs {
    pub fn new(target_rate: f32, timeout: Duration) -> Self {
        Self {
            target_rate,
            timeout,
            capture: None,
        }
    }

    fn find_device(device_id: Option<&str>) -> Result<Device> {
        let host = cpal::default_host();
        match device_id {
            None => host
                .default_input_device()
                .ok_or_else(|| SourceError::Unavailable("no default input device".into())),
            Some(id) => host
                .input_devices()
                .map_err(|e| SourceError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n == id).unwrap_or(false))
                .ok_or_else(|| SourceError::Unavailable(format!("input device '{}' not found", id))),
        }
    }

    /// Runs on the capture thread: build and play the stream, report back, then
    /// park until asked to stop. Dropping the stream ends the capture.
    fn run_capture(
        device: Device,
        target_rate: f32,
        sink: LiveBuffer,
        ready: Sender<Result<String>>,
        stop: mpsc::Receiver<()>,
    ) {
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let stream = match Self::build_stream(&device, target_rate, sink) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready.send(Err(SourceError::Device(format!("failed to play stream: {}", e))));
            return;
        }
        if ready.send(Ok(name)).is_err() {
            // Opener timed out and went away
            return;
        }
        let _ = stop.recv();
        drop(stream);
    }

    fn build_stream(device: &Device, target_rate: f32, sink: LiveBuffer) -> Result<cpal::Stream> {
        let supported = device
            .default_input_config()
            .map_err(|e| SourceError::Device(format!("failed to get config: {}", e)))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(SourceError::Device(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            )));
        }
        let config: StreamConfig = supported.into();
        let channels = config.channels as usize;
        let mut adapter = RateAdapter::new(config.sample_rate.0 as f32, target_rate);
        let mut mono = Vec::new();
        let mut resampled = Vec::new();

        let err_fn = |err| warn!(error = %err, "input stream error");

        device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    mono.clear();
                    mono.extend(
                        data.chunks(channels)
                            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32),
                    );
                    resampled.clear();
                    adapter.process(&mono, &mut resampled);
                    sink.push_samples(&resampled);
                },
                err_fn,
                None,
            )
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("ermission") {
                    SourceError::PermissionDenied(message)
                } else {
                    SourceError::Device(format!("failed to build stream: {}", message))
                }
            })
    }
}

impl InputDevices for CpalInputs {
    fn enumerate(&mut self) -> Result<Vec<InputDevice>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SourceError::Device(e.to_string()))?
            .filter_map(|d| d.name().ok())
            .map(|name| InputDevice {
                id: name.clone(),
                label: name,
            })
            .collect();
        Ok(devices)
    }

    fn open(&mut self, device_id: Option<&str>, sink: LiveBuffer) -> Result<()> {
        self.close();

        let device = Self::find_device(device_id)?;
        let target_rate = self.target_rate;
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("beat-viz-capture".into())
            .spawn(move || Self::run_capture(device, target_rate, sink, ready_tx, stop_rx))
            .map_err(|e| SourceError::Device(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(self.timeout) {
            Ok(Ok(name)) => {
                info!(device = %name, "capturing input");
                self.capture = Some(Capture {
                    stop: stop_tx,
                    thread,
                });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Err(SourceError::Device(format!(
                "device open timed out after {:?}",
                self.timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SourceError::Device("capture thread exited".into()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(capture) = self.capture.take() {
            let _ = capture.stop.send(());
            if capture.thread.join().is_err() {
                warn!("capture thread panicked");
            }
            debug!("input closed");
        }
    }
}

impl Drop for CpalInputs {
    fn drop(&mut self) {
        self.close();
    }
}

/// Print every input device, for `--list-devices`
pub fn list_devices() {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    println!("\n=== Input Devices ===");
    match host.input_devices() {
        Ok(devices) => {
            for (idx, device) in devices.enumerate() {
                if let Ok(name) = device.name() {
                    let marker = if Some(&name) == default_name.as_ref() { " (default)" } else { "" };
                    println!("  [{}] {}{}", idx, name, marker);
                }
            }
        }
        Err(e) => println!("  failed to enumerate: {}", e),
    }
    println!("Pass --device <name> with --mic to capture from one\n");
}

/// Linear-interpolating sample rate converter that keeps its position across
/// callbacks
struct RateAdapter {
    step: f64,
    position: f64,
    last: f32,
}

impl RateAdapter {
    fn new(from_rate: f32, to_rate: f32) -> Self {
        Self {
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            last: 0.0,
        }
    }

    /// Append the resampled form of `input` to `out`. Position 0 sits on the
    /// last sample of the previous call.
    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        let sample = |i: usize| if i == 0 { self.last } else { input[i - 1] };
        let len = input.len() as f64;
        while self.position < len {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            let a = sample(index);
            let b = sample(index + 1);
            out.push(a + (b - a) * frac);
            self.position += self.step;
        }
        self.position -= len;
        self.last = input[input.len() - 1];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_passes_through_with_one_sample_delay() {
        let mut adapter = RateAdapter::new(48000.0, 48000.0);
        let mut out = Vec::new();
        adapter.process(&[1.0, 2.0, 3.0], &mut out);
        assert_eq!(out, vec![0.0, 1.0, 2.0]);

        out.clear();
        adapter.process(&[4.0, 5.0], &mut out);
        assert_eq!(out, vec![3.0, 4.0]);
    }

    #[test]
    fn test_downsampling_halves_sample_count() {
        let mut adapter = RateAdapter::new(96000.0, 48000.0);
        let mut out = Vec::new();
        for _ in 0..10 {
            adapter.process(&[0.5; 480], &mut out);
        }
        assert_eq!(out.len(), 2400);
        assert!(out[10..].iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_upsampling_interpolates() {
        let mut adapter = RateAdapter::new(24000.0, 48000.0);
        let mut out = Vec::new();
        adapter.process(&[1.0, 1.0], &mut out);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.0]);
    }
}
