//! Live capture from an input device.
//!
//! Captured audio only feeds the analyser tap. It is never routed to the
//! output so the microphone cannot feed back through the speakers.

use tracing::{debug, info};

use super::{AudioSource, Routing, SourceGraph};
use crate::audio::analyzer::{rms_volume, AnalyzerTap};
use crate::audio::graph::{LiveBuffer, NodeId, NodeSpec, SharedContext};
use crate::config::AnalyzerConfig;
use crate::error::Result;

/// An input device as reported by the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputDevice {
    pub id: String,
    pub label: String,
}

/// Host access to capture devices.
///
/// `open` starts pushing mono samples at the context rate into `sink` until
/// `close` is called.
pub trait InputDevices: Send {
    fn enumerate(&mut self) -> Result<Vec<InputDevice>>;

    /// Open `device_id`, or the default input when `None`
    fn open(&mut self, device_id: Option<&str>, sink: LiveBuffer) -> Result<()>;

    fn close(&mut self);
}

/// Instantaneous input meter reading
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VolumeLevels {
    pub volume: f32,
    pub peak: f32,
}

pub struct MicrophoneSource {
    graph: SourceGraph,
    devices: Box<dyn InputDevices>,
    device_id: Option<String>,
    live: LiveBuffer,
    input: Option<NodeId>,
}

impl MicrophoneSource {
    pub fn new(
        context: SharedContext,
        config: &AnalyzerConfig,
        devices: Box<dyn InputDevices>,
    ) -> Result<Self> {
        Ok(Self {
            graph: SourceGraph::new(context, config, Routing::AnalysisOnly)?,
            devices,
            device_id: None,
            live: LiveBuffer::new(),
            input: None,
        })
    }

    /// Check that the device can be opened, releasing it right away
    pub fn request_permission(&mut self) -> Result<()> {
        if self.input.is_some() {
            return Ok(());
        }
        self.devices
            .open(self.device_id.as_deref(), LiveBuffer::new())?;
        self.devices.close();
        debug!("microphone access granted");
        Ok(())
    }

    pub fn enumerate_devices(&mut self) -> Result<Vec<InputDevice>> {
        self.devices.enumerate()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Change the capture device, restarting capture if it was running
    pub fn switch_device(&mut self, device_id: &str) -> Result<()> {
        let was_active = self.is_active();
        self.stop();
        self.device_id = Some(device_id.to_string());
        info!(device = device_id, "microphone device selected");
        if was_active {
            self.start()?;
        }
        Ok(())
    }

    /// Current RMS and peak of the tap's waveform, read into a scratch buffer
    pub fn volume_levels(&self) -> VolumeLevels {
        if !self.is_active() {
            return VolumeLevels::default();
        }

        let tap = self.graph.tap();
        let mut samples = vec![128u8; tap.frequency_bin_count()];
        tap.read_time_domain(&mut samples);

        let peak = samples
            .iter()
            .map(|&b| ((b as f32 - 128.0) / 128.0).abs())
            .fold(0.0f32, f32::max);
        VolumeLevels {
            volume: rms_volume(&samples),
            peak,
        }
    }
}

impl AudioSource for MicrophoneSource {
    fn start(&mut self) -> Result<()> {
        self.stop();
        self.graph.resume()?;

        self.devices
            .open(self.device_id.as_deref(), self.live.clone())?;

        let created = self
            .graph
            .context()
            .lock()
            .create_node(NodeSpec::LiveInput {
                buffer: self.live.clone(),
            });
        let node = match created {
            Ok(node) => node,
            Err(e) => {
                self.devices.close();
                return Err(e.into());
            }
        };
        self.input = Some(node);
        if let Err(e) = self.graph.attach(node) {
            self.stop();
            return Err(e);
        }

        debug!(device = ?self.device_id, "microphone capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(node) = self.input.take() {
            self.graph.detach(node);
            self.devices.close();
            debug!("microphone capture stopped");
        }
        self.live.clear();
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        self.input.is_some()
    }

    fn analyzer_tap(&self) -> &AnalyzerTap {
        self.graph.tap()
    }

    fn set_volume(&mut self, level: f32) {
        self.graph.set_volume(level);
    }

    fn volume(&self) -> f32 {
        self.graph.volume()
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::graph::{share, AudioContext, SoftwareGraph};
    use crate::error::SourceError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeLog {
        opened: Vec<Option<String>>,
        open_now: bool,
        sink: Option<LiveBuffer>,
    }

    struct FakeDevices {
        log: Arc<Mutex<FakeLog>>,
        deny: bool,
    }

    impl InputDevices for FakeDevices {
        fn enumerate(&mut self) -> Result<Vec<InputDevice>> {
            Ok(vec![
                InputDevice {
                    id: "usb".into(),
                    label: "USB Mic".into(),
                },
                InputDevice {
                    id: "builtin".into(),
                    label: "Built-in".into(),
                },
            ])
        }

        fn open(&mut self, device_id: Option<&str>, sink: LiveBuffer) -> Result<()> {
            if self.deny {
                return Err(SourceError::PermissionDenied("blocked".into()));
            }
            let mut log = self.log.lock();
            log.opened.push(device_id.map(str::to_string));
            log.open_now = true;
            log.sink = Some(sink);
            Ok(())
        }

        fn close(&mut self) {
            self.log.lock().open_now = false;
        }
    }

    fn setup(deny: bool) -> (Arc<Mutex<SoftwareGraph>>, Arc<Mutex<FakeLog>>, MicrophoneSource) {
        let graph = share(SoftwareGraph::new(8000.0));
        let context: SharedContext = graph.clone();
        let log = Arc::new(Mutex::new(FakeLog::default()));
        let devices = FakeDevices {
            log: log.clone(),
            deny,
        };
        let mic =
            MicrophoneSource::new(context, &AnalyzerConfig::default(), Box::new(devices)).unwrap();
        (graph, log, mic)
    }

    #[test]
    fn test_permission_releases_device() {
        let (_graph, log, mut mic) = setup(false);
        mic.request_permission().unwrap();
        assert_eq!(log.lock().opened.len(), 1);
        assert!(!log.lock().open_now);
        assert!(!mic.is_active());
    }

    #[test]
    fn test_permission_denied_propagates() {
        let (_graph, _log, mut mic) = setup(true);
        assert!(matches!(
            mic.request_permission(),
            Err(SourceError::PermissionDenied(_))
        ));
        assert!(mic.start().is_err());
        assert!(!mic.is_active());
    }

    #[test]
    fn test_capture_never_reaches_output() {
        let (graph, log, mut mic) = setup(false);
        mic.start().unwrap();

        let input = mic.input.unwrap();
        {
            let ctx = graph.lock();
            assert!(ctx.is_routed(input, mic.analyzer_tap().node()));
            assert!(!ctx.is_routed(input, ctx.destination()));
        }

        // Loud capture is visible to the tap but silent at the speakers
        let sink = log.lock().sink.clone().unwrap();
        sink.push_samples(&[0.5; 4096]);
        let mut out = [1.0f32; 2048];
        graph.lock().render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        let levels = mic.volume_levels();
        assert!(levels.volume > 0.4);
        assert!((levels.peak - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_switch_device_preserves_active_state() {
        let (_graph, log, mut mic) = setup(false);

        mic.switch_device("usb").unwrap();
        assert!(!mic.is_active());
        assert!(log.lock().opened.is_empty());

        mic.start().unwrap();
        mic.switch_device("builtin").unwrap();
        assert!(mic.is_active());
        assert_eq!(
            log.lock().opened.last().cloned().flatten().as_deref(),
            Some("builtin")
        );
        assert_eq!(mic.enumerate_devices().unwrap().len(), 2);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (graph, log, mut mic) = setup(false);
        let nodes = graph.lock().node_count();
        mic.start().unwrap();
        mic.stop();
        mic.stop();
        assert!(!mic.is_active());
        assert!(!log.lock().open_now);
        assert_eq!(graph.lock().node_count(), nodes);
        assert_eq!(mic.volume_levels(), VolumeLevels::default());
    }
}
