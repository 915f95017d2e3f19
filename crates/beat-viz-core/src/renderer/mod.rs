//! Visualization engines and the driver that feeds them.
//!
//! Each engine turns one [`AnalysisFrame`] into draw commands on a [`Surface`].
//! Engines keep private per-element animation state that is smoothed towards
//! per-frame targets, plus two decaying accumulators for beats and onsets.

mod bars;
mod circle;
pub mod settings;
pub mod surface;
pub mod theme;
mod wave;

use tracing::debug;

use crate::audio::{AnalysisFrame, AudioManagerState};

pub use bars::BarsEngine;
pub use circle::CircleEngine;
pub use settings::{ColorTheme, SettingsPatch, VisualizationSettings, VisualizationType};
pub use surface::{flatten_path, DrawCommand, DrawList, Fill, Glow, PathSegment, Point, Rgba, Surface};
pub use theme::{palette, Palette};
pub use wave::WaveEngine;

/// Per-frame decay of the beat pulse
const BEAT_PULSE_DECAY: f32 = 0.9;
/// Per-frame decay of the onset flash
const ONSET_FLASH_DECAY: f32 = 0.85;
/// Accumulators below this are not drawn
const EFFECT_VISIBLE: f32 = 0.01;

pub trait VisualizationEngine {
    fn kind(&self) -> VisualizationType;

    /// Draw exactly one frame
    fn render(&mut self, surface: &mut dyn Surface, frame: &AnalysisFrame);

    /// Merge new settings, reallocating or recoloring elements as needed
    fn update_settings(&mut self, patch: &SettingsPatch);

    fn settings(&self) -> &VisualizationSettings;

    /// Drop all animation state
    fn cleanup(&mut self);

    /// Number of live per-element entries
    fn element_count(&self) -> usize;

    fn effects(&self) -> FrameEffects;
}

/// Beat pulse and onset flash accumulators
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameEffects {
    pub beat_pulse: f32,
    pub onset_flash: f32,
}

impl FrameEffects {
    /// Snap to 1.0 on an enabled event, decay otherwise
    pub fn update(&mut self, frame: &AnalysisFrame, settings: &VisualizationSettings) {
        if frame.beat && settings.pulse_beat_sync {
            self.beat_pulse = 1.0;
        } else {
            self.beat_pulse *= BEAT_PULSE_DECAY;
        }

        if frame.onset && settings.flash_onset {
            self.onset_flash = 1.0;
        } else {
            self.onset_flash *= ONSET_FLASH_DECAY;
        }
    }
}

/// Exponential approach of `current` towards `target`
pub fn smooth(current: f32, target: f32, smoothing: f32) -> f32 {
    current + (target - current) * (1.0 - smoothing)
}

/// Normalized magnitude of `bin`, 0 when out of range
fn bin_level(frequency: &[u8], bin: usize) -> f32 {
    frequency.get(bin).map_or(0.0, |&m| m as f32 / 255.0)
}

/// Bin that element `index` of `count` maps to
fn element_bin(index: usize, count: usize, bins: usize) -> usize {
    if count == 0 {
        return 0;
    }
    index * bins / count
}

/// Paint the theme background over the previous frame, leaving trails
fn fade(surface: &mut dyn Surface, settings: &VisualizationSettings) {
    let (width, height) = surface.size();
    let background = palette(settings.color_theme).background;
    surface.draw(DrawCommand::Rect {
        x: 0.0,
        y: 0.0,
        width,
        height,
        fill: Fill::Solid(background.with_alpha(1.0 - settings.background_opacity)),
        glow: None,
    });
}

/// Full-surface wash sized by the onset flash
fn draw_flash(surface: &mut dyn Surface, effects: &FrameEffects, color: Rgba) {
    if effects.onset_flash < EFFECT_VISIBLE {
        return;
    }
    let (width, height) = surface.size();
    surface.draw(DrawCommand::Rect {
        x: 0.0,
        y: 0.0,
        width,
        height,
        fill: Fill::Solid(color.with_alpha(effects.onset_flash * 0.15)),
        glow: None,
    });
}

pub fn create_engine(settings: VisualizationSettings) -> Box<dyn VisualizationEngine> {
    let settings = settings.clamped();
    match settings.kind {
        VisualizationType::Circle => Box::new(CircleEngine::new(settings)),
        VisualizationType::Bars => Box::new(BarsEngine::new(settings)),
        VisualizationType::Wave => Box::new(WaveEngine::new(settings)),
    }
}

/// Owns the active engine and feeds it the latest analysis while playing
pub struct RenderDriver {
    settings: VisualizationSettings,
    engine: Box<dyn VisualizationEngine>,
}

impl RenderDriver {
    pub fn new(settings: VisualizationSettings) -> Self {
        let settings = settings.clamped();
        Self {
            engine: create_engine(settings.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &VisualizationSettings {
        &self.settings
    }

    pub fn engine(&self) -> &dyn VisualizationEngine {
        self.engine.as_ref()
    }

    /// Apply a patch; a type change replaces the engine and discards its state
    pub fn update_settings(&mut self, patch: &SettingsPatch) {
        let next = self.settings.merged(patch);
        if next.kind != self.settings.kind {
            debug!(from = %self.settings.kind, to = %next.kind, "switching visualization");
            self.engine.cleanup();
            self.engine = create_engine(next.clone());
        } else {
            self.engine.update_settings(patch);
        }
        self.settings = next;
    }

    /// Render the state's latest analysis. Returns false when nothing was drawn.
    pub fn frame(&mut self, state: &AudioManagerState, surface: &mut dyn Surface) -> bool {
        match (&state.analysis, state.is_playing) {
            (Some(frame), true) => {
                self.engine.render(surface, frame);
                true
            }
            _ => false,
        }
    }

    pub fn cleanup(&mut self) {
        self.engine.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn playing_state(frame: AnalysisFrame) -> AudioManagerState {
        AudioManagerState {
            is_playing: true,
            has_source: true,
            analysis: Some(Arc::new(frame)),
            ..Default::default()
        }
    }

    fn loud_frame() -> AnalysisFrame {
        AnalysisFrame {
            frequency_data: vec![200; 256],
            time_data: vec![160; 256],
            volume: 0.25,
            ..Default::default()
        }
    }

    #[test]
    fn test_effects_snap_and_decay() {
        let settings = VisualizationSettings::default();
        let mut effects = FrameEffects::default();
        let beat = AnalysisFrame {
            beat: true,
            onset: true,
            ..Default::default()
        };
        effects.update(&beat, &settings);
        assert_eq!(effects, FrameEffects { beat_pulse: 1.0, onset_flash: 1.0 });

        effects.update(&AnalysisFrame::default(), &settings);
        assert!((effects.beat_pulse - 0.9).abs() < 1e-6);
        assert!((effects.onset_flash - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_sync_ignores_events() {
        let settings = VisualizationSettings {
            pulse_beat_sync: false,
            flash_onset: false,
            ..Default::default()
        };
        let mut effects = FrameEffects::default();
        effects.update(
            &AnalysisFrame {
                beat: true,
                onset: true,
                ..Default::default()
            },
            &settings,
        );
        assert_eq!(effects, FrameEffects::default());
    }

    #[test]
    fn test_smooth_moves_by_factor() {
        assert!((smooth(0.0, 10.0, 0.8) - 2.0).abs() < 1e-5);
        assert_eq!(smooth(3.0, 10.0, 0.0), 10.0);
    }

    #[test]
    fn test_driver_skips_when_not_playing() {
        let mut driver = RenderDriver::new(VisualizationSettings::default());
        let mut surface = DrawList::new(800.0, 600.0);

        assert!(!driver.frame(&AudioManagerState::default(), &mut surface));
        let mut paused = playing_state(loud_frame());
        paused.is_playing = false;
        assert!(!driver.frame(&paused, &mut surface));
        assert!(surface.is_empty());

        assert!(driver.frame(&playing_state(loud_frame()), &mut surface));
        assert!(!surface.is_empty());
    }

    #[test]
    fn test_driver_swaps_engine_on_type_change() {
        let mut driver = RenderDriver::new(VisualizationSettings::default());
        let mut surface = DrawList::new(800.0, 600.0);
        driver.frame(&playing_state(loud_frame()), &mut surface);
        assert_eq!(driver.engine().kind(), VisualizationType::Circle);

        driver.update_settings(&SettingsPatch::kind(VisualizationType::Bars));
        assert_eq!(driver.engine().kind(), VisualizationType::Bars);
        // Fresh engine, nothing carried over
        assert_eq!(driver.engine().element_count(), 0);
        assert_eq!(driver.engine().effects(), FrameEffects::default());

        driver.update_settings(&SettingsPatch::theme(ColorTheme::Sunset));
        assert_eq!(driver.engine().kind(), VisualizationType::Bars);
        assert_eq!(driver.engine().settings().color_theme, ColorTheme::Sunset);
    }

    #[test]
    fn test_fade_uses_inverse_opacity() {
        let settings = VisualizationSettings {
            background_opacity: 0.25,
            ..Default::default()
        };
        let mut surface = DrawList::new(10.0, 10.0);
        fade(&mut surface, &settings);
        match &surface.commands()[0] {
            DrawCommand::Rect { fill: Fill::Solid(c), width, .. } => {
                assert_eq!(*width, 10.0);
                assert!((c.a - 0.75).abs() < 1e-6);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
