//! Spectrum bars rising from the bottom edge.

use super::surface::{DrawCommand, Fill, Glow, Rgba, Surface};
use super::theme::palette;
use super::{
    draw_flash, fade, smooth, FrameEffects, SettingsPatch, VisualizationEngine,
    VisualizationSettings, VisualizationType, EFFECT_VISIBLE,
};
use crate::audio::AnalysisFrame;

/// Upper bound on bars regardless of particle count
pub const MAX_BARS: usize = 128;
/// Bars shorter than this are skipped
const MIN_VISIBLE_HEIGHT: f32 = 0.5;
/// Bars taller than this get the highlight strip
const HIGHLIGHT_MIN_HEIGHT: f32 = 4.0;
const HIGHLIGHT_HEIGHT: f32 = 2.0;
/// Fraction of each slot left empty between bars
const GAP: f32 = 0.2;

#[derive(Clone, Debug)]
struct Bar {
    height: f32,
    target_height: f32,
    glow_intensity: f32,
    color: Rgba,
}

pub struct BarsEngine {
    settings: VisualizationSettings,
    bars: Vec<Bar>,
    size: (f32, f32),
    max_height: f32,
    effects: FrameEffects,
}

impl BarsEngine {
    pub fn new(settings: VisualizationSettings) -> Self {
        Self {
            settings: settings.clamped(),
            bars: Vec::new(),
            size: (0.0, 0.0),
            max_height: 0.0,
            effects: FrameEffects::default(),
        }
    }

    fn bar_count(&self) -> usize {
        (self.settings.particle_count as usize).min(MAX_BARS)
    }

    fn allocate(&mut self) {
        let colors = palette(self.settings.color_theme);
        self.bars = (0..self.bar_count())
            .map(|i| Bar {
                height: 0.0,
                target_height: 0.0,
                glow_intensity: 0.0,
                color: colors.color(i),
            })
            .collect();
    }

    fn recolor(&mut self) {
        let colors = palette(self.settings.color_theme);
        for (i, bar) in self.bars.iter_mut().enumerate() {
            bar.color = colors.color(i);
        }
    }

    fn draw_bars(&self, surface: &mut dyn Surface) {
        let (width, height) = self.size;
        let slot = width / self.bars.len().max(1) as f32;
        let bar_width = slot * (1.0 - GAP);
        let glow = self.settings.glow_intensity;

        for (i, bar) in self.bars.iter().enumerate() {
            if bar.height < MIN_VISIBLE_HEIGHT {
                continue;
            }
            let x = i as f32 * slot + slot * GAP / 2.0;
            let top = height - bar.height;

            surface.draw(DrawCommand::Rect {
                x,
                y: top,
                width: bar_width,
                height: bar.height,
                fill: Fill::VerticalGradient {
                    top: bar.color.with_alpha(0.4),
                    bottom: bar.color,
                },
                glow: Glow::new(bar.color, glow * bar.glow_intensity * 15.0),
            });

            if bar.height > HIGHLIGHT_MIN_HEIGHT {
                surface.draw(DrawCommand::Rect {
                    x,
                    y: top,
                    width: bar_width,
                    height: HIGHLIGHT_HEIGHT,
                    fill: Fill::Solid(bar.color.lighten(0.6).with_alpha(0.9)),
                    glow: None,
                });
            }
        }
    }

    fn draw_overlays(&self, surface: &mut dyn Surface) {
        let (width, height) = self.size;
        let colors = palette(self.settings.color_theme);

        draw_flash(surface, &self.effects, colors.color(3));

        let pulse = self.effects.beat_pulse;
        if pulse > EFFECT_VISIBLE {
            let thickness = 2.0 + pulse * 6.0;
            surface.draw(DrawCommand::Rect {
                x: 0.0,
                y: height - thickness,
                width,
                height: thickness,
                fill: Fill::Solid(colors.color(0).with_alpha(pulse)),
                glow: Glow::new(colors.color(0), self.settings.glow_intensity * pulse * 20.0),
            });
        }
    }
}

impl VisualizationEngine for BarsEngine {
    fn kind(&self) -> VisualizationType {
        VisualizationType::Bars
    }

    fn render(&mut self, surface: &mut dyn Surface, frame: &AnalysisFrame) {
        let size = surface.size();
        if size != self.size {
            self.size = size;
            self.max_height = size.1 * 0.8 * self.settings.size_scale;
        }
        if self.bars.len() != self.bar_count() {
            self.allocate();
        }

        fade(surface, &self.settings);
        self.effects.update(frame, &self.settings);

        let bins = frame.frequency_data.len();
        let bins_per_bar = (bins / self.bars.len().max(1)).max(1);
        let sensitivity = self.settings.sensitivity;
        let smoothing = self.settings.smoothing;
        let boost = 1.0 + self.effects.beat_pulse * 0.2;
        let max_height = self.max_height;

        for (i, bar) in self.bars.iter_mut().enumerate() {
            let start = (i * bins_per_bar).min(bins);
            let end = (start + bins_per_bar).min(bins);
            let slice = &frame.frequency_data[start..end];
            let average = if slice.is_empty() {
                0.0
            } else {
                slice.iter().map(|&m| m as f32).sum::<f32>() / slice.len() as f32 / 255.0
            };

            let level = average * sensitivity;
            bar.target_height = (level * max_height * boost).min(size.1);
            bar.height = smooth(bar.height, bar.target_height, smoothing);
            bar.glow_intensity = level.min(1.0);
        }

        self.draw_bars(surface);
        self.draw_overlays(surface);
    }

    fn update_settings(&mut self, patch: &SettingsPatch) {
        let next = self.settings.merged(patch);
        let previous = std::mem::replace(&mut self.settings, next);
        if previous.particle_count != self.settings.particle_count {
            self.allocate();
        } else if previous.color_theme != self.settings.color_theme {
            self.recolor();
        }
        if previous.size_scale != self.settings.size_scale {
            self.max_height = self.size.1 * 0.8 * self.settings.size_scale;
        }
    }

    fn settings(&self) -> &VisualizationSettings {
        &self.settings
    }

    fn cleanup(&mut self) {
        self.bars.clear();
        self.effects = FrameEffects::default();
        self.size = (0.0, 0.0);
    }

    fn element_count(&self) -> usize {
        self.bars.len()
    }

    fn effects(&self) -> FrameEffects {
        self.effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::surface::DrawList;
    use crate::renderer::ColorTheme;

    fn frame(levels: Vec<u8>) -> AnalysisFrame {
        let n = levels.len();
        AnalysisFrame {
            frequency_data: levels,
            time_data: vec![128; n],
            ..Default::default()
        }
    }

    #[test]
    fn test_particle_count_sets_bar_count() {
        let mut engine = BarsEngine::new(VisualizationSettings::default());
        let mut surface = DrawList::new(800.0, 600.0);

        engine.update_settings(&SettingsPatch::particle_count(32));
        engine.render(&mut surface, &frame(vec![100; 1024]));
        assert_eq!(engine.element_count(), 32);

        engine.update_settings(&SettingsPatch::particle_count(200));
        engine.render(&mut surface, &frame(vec![100; 1024]));
        assert_eq!(engine.element_count(), MAX_BARS);
    }

    #[test]
    fn test_bars_average_their_bins() {
        let mut engine = BarsEngine::new(VisualizationSettings {
            particle_count: 8,
            smoothing: 0.0,
            sensitivity: 1.0,
            ..Default::default()
        });
        let mut surface = DrawList::new(800.0, 500.0);

        // 16 bins, 2 per bar: first bar averages 255 and 0
        let mut levels = vec![0u8; 16];
        levels[0] = 255;
        engine.render(&mut surface, &frame(levels));

        let expected = 0.5 * 500.0 * 0.8 * engine.settings().size_scale;
        assert!((engine.bars[0].height - expected).abs() < 1e-3);
        assert_eq!(engine.bars[1].height, 0.0);
    }

    #[test]
    fn test_tall_bars_get_highlight() {
        let mut engine = BarsEngine::new(VisualizationSettings {
            particle_count: 8,
            smoothing: 0.0,
            ..Default::default()
        });
        let mut surface = DrawList::new(800.0, 500.0);
        engine.render(&mut surface, &frame(vec![255; 64]));

        let highlights = surface
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::Rect { height, .. } if *height == HIGHLIGHT_HEIGHT))
            .count();
        assert_eq!(highlights, 8);
    }

    #[test]
    fn test_fewer_bins_than_bars() {
        let mut engine = BarsEngine::new(VisualizationSettings {
            particle_count: 64,
            smoothing: 0.0,
            ..Default::default()
        });
        let mut surface = DrawList::new(800.0, 500.0);
        engine.render(&mut surface, &frame(vec![255; 10]));

        assert_eq!(engine.element_count(), 64);
        assert!(engine.bars[9].height > 0.0);
        assert_eq!(engine.bars[10].height, 0.0);
    }

    #[test]
    fn test_theme_change_recolors_in_place() {
        let mut engine = BarsEngine::new(VisualizationSettings {
            smoothing: 0.0,
            ..Default::default()
        });
        let mut surface = DrawList::new(800.0, 500.0);
        engine.render(&mut surface, &frame(vec![200; 256]));
        let height = engine.bars[0].height;

        engine.update_settings(&SettingsPatch::theme(ColorTheme::Mono));
        assert_eq!(engine.bars[0].color, Rgba::from_hex(0xffffff));
        assert_eq!(engine.bars[0].height, height);
    }
}
