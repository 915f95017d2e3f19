//! Decoded file playback with pause, resume and seek.

use std::sync::Arc;

use tracing::{debug, info};

use super::{AudioSource, Routing, SourceGraph};
use crate::audio::analyzer::AnalyzerTap;
use crate::audio::decode::decode_audio_data;
use crate::audio::graph::{AudioBuffer, NodeId, NodeSpec, SharedContext};
use crate::config::AnalyzerConfig;
use crate::error::{Result, SourceError};

pub struct FileSource {
    graph: SourceGraph,
    buffer: Option<Arc<AudioBuffer>>,
    player: Option<NodeId>,
    // Context time at which playback position zero would have started
    start_time: f64,
    // Position to resume from while inactive
    offset: f64,
    active: bool,
}

impl FileSource {
    pub fn new(context: SharedContext, config: &AnalyzerConfig) -> Result<Self> {
        Ok(Self {
            graph: SourceGraph::new(context, config, Routing::ToOutput)?,
            buffer: None,
            player: None,
            start_time: 0.0,
            offset: 0.0,
            active: false,
        })
    }

    /// Decode encoded audio bytes (WAV or MP3) and make them the current track
    pub fn load_file(&mut self, bytes: &[u8]) -> Result<()> {
        let sample_rate = self.graph.context().lock().sample_rate();
        let buffer = decode_audio_data(bytes, sample_rate)?;
        self.load_buffer(buffer);
        Ok(())
    }

    /// Use an already decoded buffer as the current track
    pub fn load_buffer(&mut self, buffer: AudioBuffer) {
        self.stop();
        info!(duration = buffer.duration(), "file source loaded");
        self.buffer = Some(Arc::new(buffer));
    }

    /// Duration of the loaded track, 0 when nothing is loaded
    pub fn duration(&self) -> f64 {
        self.buffer.as_ref().map_or(0.0, |b| b.duration())
    }

    /// Playback position in seconds, never past the end of the track
    pub fn current_time(&self) -> f64 {
        let position = if self.active {
            self.graph.now() - self.start_time
        } else {
            self.offset
        };
        position.clamp(0.0, self.duration())
    }

    /// Stop playback and remember the position for the next `start`
    pub fn pause(&mut self) {
        if !self.active {
            return;
        }
        self.offset = if self.ended() { 0.0 } else { self.current_time() };
        self.teardown();
        debug!(offset = self.offset, "file source paused");
    }

    /// Jump to `time`, clamped to the track; playback continues if running
    pub fn seek(&mut self, time: f64) -> Result<()> {
        if self.buffer.is_none() {
            return Err(SourceError::Unavailable("no audio file loaded".into()));
        }
        let playing = self.is_active();
        // Drops a player that already ran off the end along with its active flag
        self.teardown();
        self.offset = time.clamp(0.0, self.duration());
        if playing {
            self.start()?;
        }
        Ok(())
    }

    // Playback ran off the end of the buffer by itself
    fn ended(&self) -> bool {
        self.player
            .is_some_and(|node| self.graph.context().lock().is_finished(node))
    }

    fn teardown(&mut self) {
        if let Some(node) = self.player.take() {
            self.graph.detach(node);
        }
        self.active = false;
    }
}

impl AudioSource for FileSource {
    fn start(&mut self) -> Result<()> {
        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| SourceError::Unavailable("no audio file loaded".into()))?;

        if self.ended() {
            self.offset = 0.0;
        }
        self.teardown();
        self.graph.resume()?;

        let node = {
            let mut ctx = self.graph.context().lock();
            let node = ctx.create_node(NodeSpec::BufferSource { buffer })?;
            let now = ctx.current_time();
            ctx.start_node(node, now, self.offset)?;
            self.start_time = now - self.offset;
            node
        };
        self.graph.attach(node)?;

        self.player = Some(node);
        self.active = true;
        debug!(offset = self.offset, "file source started");
        Ok(())
    }

    fn stop(&mut self) {
        self.teardown();
        self.offset = 0.0;
    }

    fn is_ready(&self) -> bool {
        self.buffer.is_some()
    }

    fn is_active(&self) -> bool {
        self.active && !self.ended()
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

impl Drop for FileSource {
    fn drop(&mut self) {
        self.teardown();
    }
}
