//! Traveling wave whose local amplitude follows the spectrum.

use super::surface::{DrawCommand, Glow, PathSegment, Point, Surface};
use super::theme::palette;
use super::{
    bin_level, draw_flash, element_bin, fade, smooth, FrameEffects, SettingsPatch,
    VisualizationEngine, VisualizationSettings, VisualizationType, EFFECT_VISIBLE,
};
use crate::audio::AnalysisFrame;

/// Upper bound on wave points
pub const MAX_POINTS: usize = 256;
/// Phase advance per frame at rotation speed 1.0
const PHASE_STEP: f32 = 0.05;
/// Amplitude multipliers of the layered curves
const LAYERS: [f32; 3] = [1.0, 0.7, 0.4];
/// Points louder than this get a dot
const DOT_AMPLITUDE: f32 = 0.5;

#[derive(Clone, Debug, Default)]
struct WavePoint {
    x: f32,
    y: f32,
    target_y: f32,
    amplitude: f32,
}

pub struct WaveEngine {
    settings: VisualizationSettings,
    points: Vec<WavePoint>,
    size: (f32, f32),
    center_y: f32,
    max_amplitude: f32,
    phase: f32,
    effects: FrameEffects,
}

impl WaveEngine {
    pub fn new(settings: VisualizationSettings) -> Self {
        Self {
            settings: settings.clamped(),
            points: Vec::new(),
            size: (0.0, 0.0),
            center_y: 0.0,
            max_amplitude: 0.0,
            phase: 0.0,
            effects: FrameEffects::default(),
        }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    fn point_count(&self) -> usize {
        (self.settings.particle_count as usize * 2).min(MAX_POINTS)
    }

    fn resize(&mut self, width: f32, height: f32) {
        self.size = (width, height);
        self.center_y = height / 2.0;
        self.max_amplitude = height * 0.35 * self.settings.size_scale;
        self.layout();
    }

    fn layout(&mut self) {
        let last = self.points.len().saturating_sub(1).max(1) as f32;
        let width = self.size.0;
        let center = self.center_y;
        for (i, point) in self.points.iter_mut().enumerate() {
            point.x = i as f32 / last * width;
            point.y = center;
            point.target_y = center;
        }
    }

    fn allocate(&mut self) {
        self.points = vec![WavePoint::default(); self.point_count()];
        self.layout();
    }

    /// Quadratic curve through midpoints, scaled around the center line
    fn curve(&self, multiplier: f32) -> Vec<PathSegment> {
        let scaled: Vec<Point> = self
            .points
            .iter()
            .map(|p| Point::new(p.x, self.center_y + (p.y - self.center_y) * multiplier))
            .collect();

        let mut segments = Vec::with_capacity(scaled.len() + 1);
        let Some(&first) = scaled.first() else {
            return segments;
        };
        segments.push(PathSegment::MoveTo(first));
        for pair in scaled.windows(2) {
            segments.push(PathSegment::QuadTo {
                control: pair[0],
                to: pair[0].midpoint(pair[1]),
            });
        }
        if let Some(&last) = scaled.last() {
            segments.push(PathSegment::LineTo(last));
        }
        segments
    }

    fn draw_wave(&self, surface: &mut dyn Surface) {
        let colors = palette(self.settings.color_theme);
        let glow = self.settings.glow_intensity;
        let scale = self.settings.size_scale;

        for (layer, &multiplier) in LAYERS.iter().enumerate() {
            let color = colors.color(layer);
            surface.draw(DrawCommand::Path {
                segments: self.curve(multiplier),
                color: color.with_alpha(0.3 + 0.5 * multiplier),
                width: (1.0 + 2.0 * multiplier) * scale.max(0.5),
                glow: Glow::new(color, glow * multiplier * 15.0),
            });
        }

        for (i, point) in self.points.iter().enumerate() {
            if point.amplitude <= DOT_AMPLITUDE {
                continue;
            }
            let color = colors.color(i);
            surface.draw(DrawCommand::Circle {
                center: Point::new(point.x, point.y),
                radius: (2.0 + point.amplitude * 3.0) * scale,
                color: color.with_alpha(point.amplitude.min(1.0)),
                glow: Glow::new(color, glow * point.amplitude * 10.0),
            });
        }
    }

    fn draw_overlays(&self, surface: &mut dyn Surface) {
        let colors = palette(self.settings.color_theme);
        draw_flash(surface, &self.effects, colors.color(3));

        let pulse = self.effects.beat_pulse;
        if pulse > EFFECT_VISIBLE {
            surface.draw(DrawCommand::Line {
                from: Point::new(0.0, self.center_y),
                to: Point::new(self.size.0, self.center_y),
                color: colors.color(1).with_alpha(pulse * 0.6),
                width: 1.0 + pulse * 3.0,
            });
        }
    }
}

impl VisualizationEngine for WaveEngine {
    fn kind(&self) -> VisualizationType {
        VisualizationType::Wave
    }

    fn render(&mut self, surface: &mut dyn Surface, frame: &AnalysisFrame) {
        if self.points.len() != self.point_count() {
            self.allocate();
        }
        let (width, height) = surface.size();
        if (width, height) != self.size {
            self.resize(width, height);
        }

        fade(surface, &self.settings);
        self.effects.update(frame, &self.settings);
        self.phase += self.settings.rotation_speed * PHASE_STEP;

        let bins = frame.frequency_data.len();
        let count = self.points.len();
        let sensitivity = self.settings.sensitivity;
        let smoothing = self.settings.smoothing;
        let pulse = self.effects.beat_pulse;
        let phase = self.phase;
        let center = self.center_y;
        let max_amplitude = self.max_amplitude;

        for (i, point) in self.points.iter_mut().enumerate() {
            let level = bin_level(&frame.frequency_data, element_bin(i, count, bins)) * sensitivity;
            point.amplitude = smooth(point.amplitude, level, smoothing);

            let travel = (i as f32 * 0.1 + phase).sin();
            let mut offset = level * max_amplitude * travel;
            if pulse > EFFECT_VISIBLE {
                offset += pulse * max_amplitude * 0.3 * (i as f32 * 0.3 + phase * 2.0).sin();
            }

            point.target_y = center + offset;
            point.y = smooth(point.y, point.target_y, smoothing);
        }

        self.draw_wave(surface);
        self.draw_overlays(surface);
    }

    fn update_settings(&mut self, patch: &SettingsPatch) {
        let next = self.settings.merged(patch);
        let previous = std::mem::replace(&mut self.settings, next);
        if previous.particle_count != self.settings.particle_count {
            self.allocate();
        }
        if previous.size_scale != self.settings.size_scale {
            self.max_amplitude = self.size.1 * 0.35 * self.settings.size_scale;
        }
    }

    fn settings(&self) -> &VisualizationSettings {
        &self.settings
    }

    fn cleanup(&mut self) {
        self.points.clear();
        self.phase = 0.0;
        self.effects = FrameEffects::default();
        self.size = (0.0, 0.0);
    }

    fn element_count(&self) -> usize {
        self.points.len()
    }

    fn effects(&self) -> FrameEffects {
        self.effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::surface::DrawList;

    fn frame(level: u8) -> AnalysisFrame {
        AnalysisFrame {
            frequency_data: vec![level; 512],
            time_data: vec![128; 512],
            ..Default::default()
        }
    }

    fn paths(surface: &DrawList) -> usize {
        surface
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::Path { .. }))
            .count()
    }

    #[test]
    fn test_point_count_doubles_and_caps() {
        let mut surface = DrawList::new(800.0, 400.0);

        let mut engine = WaveEngine::new(VisualizationSettings {
            particle_count: 40,
            ..Default::default()
        });
        engine.render(&mut surface, &frame(0));
        assert_eq!(engine.element_count(), 80);

        engine.update_settings(&SettingsPatch::particle_count(200));
        engine.render(&mut surface, &frame(0));
        assert_eq!(engine.element_count(), MAX_POINTS);
    }

    #[test]
    fn test_three_layered_curves() {
        let mut engine = WaveEngine::new(VisualizationSettings::default());
        let mut surface = DrawList::new(800.0, 400.0);
        engine.render(&mut surface, &frame(0));
        assert_eq!(paths(&surface), 3);
    }

    #[test]
    fn test_silence_stays_on_center_line() {
        let mut engine = WaveEngine::new(VisualizationSettings::default());
        let mut surface = DrawList::new(800.0, 400.0);
        for _ in 0..5 {
            engine.render(&mut surface, &frame(0));
        }
        assert!(engine.points.iter().all(|p| (p.y - 200.0).abs() < 1e-4));
        assert_eq!(engine.points.last().map(|p| p.x), Some(800.0));
    }

    #[test]
    fn test_phase_accumulates() {
        let mut engine = WaveEngine::new(VisualizationSettings {
            rotation_speed: -1.0,
            ..Default::default()
        });
        let mut surface = DrawList::new(800.0, 400.0);
        for _ in 0..4 {
            engine.render(&mut surface, &frame(0));
        }
        assert!((engine.phase() + 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_loud_points_get_dots() {
        let mut engine = WaveEngine::new(VisualizationSettings {
            smoothing: 0.0,
            particle_count: 8,
            ..Default::default()
        });
        let mut surface = DrawList::new(800.0, 400.0);
        engine.render(&mut surface, &frame(255));

        let dots = surface
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::Circle { .. }))
            .count();
        assert_eq!(dots, 16);
    }

    #[test]
    fn test_resize_recomputes_layout() {
        let mut engine = WaveEngine::new(VisualizationSettings::default());
        let mut surface = DrawList::new(800.0, 400.0);
        engine.render(&mut surface, &frame(0));

        surface.resize(1200.0, 600.0);
        engine.render(&mut surface, &frame(0));
        assert_eq!(engine.points.last().map(|p| p.x), Some(1200.0));
        assert_eq!(engine.center_y, 300.0);
    }
}
