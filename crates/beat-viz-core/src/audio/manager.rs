//! Source lifecycle and the per-frame analysis loop.
//!
//! The manager owns the current source, runs the analyzer once per scheduled
//! frame while playing and publishes immutable [`AudioManagerState`]
//! snapshots to subscribers.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::analyzer::{AnalysisFrame, AnalyzerEngine};
use super::graph::SharedContext;
use super::scheduler::{FrameId, FrameQueue, FrameScheduler};
use super::source::{AudioSource, Source, SourceType};
use crate::config::AnalyzerConfig;
use crate::error::{Result, SourceError};

/// Published snapshot of the manager
#[derive(Clone, Debug, PartialEq)]
pub struct AudioManagerState {
    pub source_type: Option<SourceType>,
    pub has_source: bool,
    pub is_playing: bool,
    pub volume: f32,
    /// Latest analysis, cleared whenever playback stops
    pub analysis: Option<Arc<AnalysisFrame>>,
}

impl Default for AudioManagerState {
    fn default() -> Self {
        Self {
            source_type: None,
            has_source: false,
            is_playing: false,
            volume: 1.0,
            analysis: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&AudioManagerState)>;

pub struct AudioManager<S: FrameScheduler = FrameQueue> {
    context: SharedContext,
    scheduler: S,
    analyzer: AnalyzerEngine,
    source: Option<Source>,
    state: Arc<AudioManagerState>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    pending_frame: Option<FrameId>,
    destroyed: bool,
}

impl AudioManager<FrameQueue> {
    pub fn with_frame_queue(context: SharedContext, config: &AnalyzerConfig) -> Self {
        Self::new(context, FrameQueue::new(), config)
    }
}

impl<S: FrameScheduler> AudioManager<S> {
    pub fn new(context: SharedContext, scheduler: S, config: &AnalyzerConfig) -> Self {
        Self {
            context,
            scheduler,
            analyzer: AnalyzerEngine::new(config),
            source: None,
            state: Arc::new(AudioManagerState::default()),
            subscribers: Vec::new(),
            next_subscription: 0,
            pending_frame: None,
            destroyed: false,
        }
    }

    /// Resume the audio context so sources can produce sound
    pub fn initialize(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.context.lock().resume()?;
        debug!("audio manager initialized");
        Ok(())
    }

    pub fn state(&self) -> Arc<AudioManagerState> {
        self.state.clone()
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn analyzer_mut(&mut self) -> &mut AnalyzerEngine {
        &mut self.analyzer
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> Option<&mut Source> {
        self.source.as_mut()
    }

    /// Replace the current source. Playback does not start automatically.
    pub fn set_source(&mut self, source: impl Into<Source>) -> Result<()> {
        self.ensure_alive()?;
        let mut source = source.into();

        self.cancel_frame();
        if let Some(mut old) = self.source.take() {
            old.stop();
        }

        source.set_volume(self.state.volume);
        let source_type = source.source_type();
        self.source = Some(source);
        info!(source = %source_type, "audio source attached");

        self.publish(|state| {
            state.source_type = Some(source_type);
            state.has_source = true;
            state.is_playing = false;
            state.analysis = None;
        });
        Ok(())
    }

    /// Start the source and the analysis loop
    pub fn start_analysis(&mut self) -> Result<()> {
        self.ensure_alive()?;
        let source = self.source.as_mut().ok_or(SourceError::NoSource)?;
        if let Err(e) = source.start() {
            warn!(error = %e, "failed to start audio source");
            return Err(e);
        }

        self.cancel_frame();
        self.pending_frame = Some(self.scheduler.request_frame());
        self.publish(|state| state.is_playing = true);
        debug!("analysis started");
        Ok(())
    }

    /// Pause the source in place (files keep their position) and stop analyzing
    pub fn pause_analysis(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.pause();
        }
        self.halt();
    }

    /// Stop the source and the analysis loop, clearing the last frame
    pub fn stop_analysis(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.stop();
        }
        self.halt();
    }

    pub fn set_volume(&mut self, level: f32) {
        let level = level.max(0.0);
        if let Some(source) = self.source.as_mut() {
            source.set_volume(level);
        }
        self.publish(|state| state.volume = level);
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&AudioManagerState) + 'static) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub, _)| *sub != id);
    }

    /// Fire every frame callback that is due
    pub fn pump(&mut self) {
        for id in self.scheduler.take_due() {
            self.on_frame(id);
        }
    }

    fn on_frame(&mut self, id: FrameId) {
        // Frames cancelled after being taken are stale
        if self.pending_frame != Some(id) {
            return;
        }
        self.pending_frame = None;

        let Some(source) = self.source.as_ref() else {
            return;
        };
        if !source.is_active() {
            debug!("playback ended");
            self.publish(|state| {
                state.is_playing = false;
                state.analysis = None;
            });
            return;
        }

        let frame = Arc::new(self.analyzer.analyze_tap(source.analyzer_tap()));
        self.pending_frame = Some(self.scheduler.request_frame());
        self.publish(|state| state.analysis = Some(frame));
    }

    /// Tear everything down; later calls are no-ops
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.stop_analysis();
        self.source = None;
        self.context.lock().close();
        self.subscribers.clear();
        self.destroyed = true;
        debug!("audio manager destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn halt(&mut self) {
        self.cancel_frame();
        self.publish(|state| {
            state.is_playing = false;
            state.analysis = None;
        });
    }

    fn cancel_frame(&mut self) {
        if let Some(id) = self.pending_frame.take() {
            self.scheduler.cancel_frame(id);
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed {
            Err(SourceError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn publish(&mut self, update: impl FnOnce(&mut AudioManagerState)) {
        let mut next = (*self.state).clone();
        update(&mut next);
        self.state = Arc::new(next);
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&self.state);
        }
    }
}

impl<S: FrameScheduler> Drop for AudioManager<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}
