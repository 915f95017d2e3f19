//! Rotating ring of particles pushed outwards by their frequency bin.

use super::surface::{DrawCommand, Glow, Point, Rgba, Surface};
use super::theme::palette;
use super::{
    bin_level, draw_flash, element_bin, fade, smooth, FrameEffects, SettingsPatch,
    VisualizationEngine, VisualizationSettings, VisualizationType, EFFECT_VISIBLE,
};
use crate::audio::AnalysisFrame;

/// Particles dimmer than this are not drawn
const MIN_VISIBLE_INTENSITY: f32 = 0.05;
/// Particles brighter than this get a spoke to the center
const SPOKE_INTENSITY: f32 = 0.3;
/// Rotation per frame at rotation speed 1.0
const ROTATION_STEP: f32 = 0.01;

#[derive(Clone, Debug)]
struct Particle {
    angle: f32,
    radius: f32,
    target_radius: f32,
    intensity: f32,
    color: Rgba,
}

#[derive(Clone, Copy, Debug, Default)]
struct Geometry {
    width: f32,
    height: f32,
    center: Point,
    base_radius: f32,
    max_offset: f32,
}

pub struct CircleEngine {
    settings: VisualizationSettings,
    particles: Vec<Particle>,
    geometry: Geometry,
    rotation: f32,
    effects: FrameEffects,
}

impl CircleEngine {
    pub fn new(settings: VisualizationSettings) -> Self {
        Self {
            settings: settings.clamped(),
            particles: Vec::new(),
            geometry: Geometry::default(),
            rotation: 0.0,
            effects: FrameEffects::default(),
        }
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    fn resize(&mut self, width: f32, height: f32) {
        let min_dim = width.min(height);
        self.geometry = Geometry {
            width,
            height,
            center: Point::new(width / 2.0, height / 2.0),
            base_radius: min_dim * 0.2 * self.settings.size_scale,
            max_offset: min_dim * 0.3 * self.settings.size_scale,
        };
        for particle in &mut self.particles {
            particle.radius = self.geometry.base_radius;
            particle.target_radius = self.geometry.base_radius;
        }
    }

    fn allocate(&mut self) {
        let count = self.settings.particle_count as usize;
        let colors = palette(self.settings.color_theme);
        let base = self.geometry.base_radius;
        self.particles = (0..count)
            .map(|i| Particle {
                angle: i as f32 / count as f32 * std::f32::consts::TAU,
                radius: base,
                target_radius: base,
                intensity: 0.0,
                color: colors.color(i),
            })
            .collect();
    }

    fn recolor(&mut self) {
        let colors = palette(self.settings.color_theme);
        for (i, particle) in self.particles.iter_mut().enumerate() {
            particle.color = colors.color(i);
        }
    }

    fn draw_particles(&self, surface: &mut dyn Surface) {
        let g = &self.geometry;
        let glow = self.settings.glow_intensity;
        let scale = self.settings.size_scale;

        for particle in &self.particles {
            if particle.intensity < MIN_VISIBLE_INTENSITY {
                continue;
            }

            let angle = particle.angle + self.rotation;
            let position = Point::new(
                g.center.x + angle.cos() * particle.radius,
                g.center.y + angle.sin() * particle.radius,
            );

            if particle.intensity > SPOKE_INTENSITY {
                surface.draw(DrawCommand::Line {
                    from: g.center,
                    to: position,
                    color: particle.color.with_alpha(particle.intensity * 0.3),
                    width: 1.0,
                });
            }

            surface.draw(DrawCommand::Circle {
                center: position,
                radius: (2.0 + particle.intensity * 6.0) * scale,
                color: particle.color.with_alpha(0.5 + particle.intensity * 0.5),
                glow: Glow::new(particle.color, glow * particle.intensity * 20.0),
            });
        }
    }

    fn draw_overlays(&self, surface: &mut dyn Surface, frame: &AnalysisFrame) {
        let g = &self.geometry;
        let colors = palette(self.settings.color_theme);

        draw_flash(surface, &self.effects, colors.color(3));

        let pulse = self.effects.beat_pulse;
        if pulse > EFFECT_VISIBLE {
            surface.draw(DrawCommand::StrokeCircle {
                center: g.center,
                radius: g.base_radius * (1.0 + pulse * 0.5),
                color: colors.color(0).with_alpha(pulse * 0.8),
                width: 2.0 + pulse * 4.0,
            });
        }

        let core = g.base_radius * 0.5 * frame.volume.clamp(0.0, 1.0);
        if core > 0.5 {
            surface.draw(DrawCommand::Circle {
                center: g.center,
                radius: core,
                color: colors.color(1).with_alpha(0.6),
                glow: Glow::new(colors.color(1), self.settings.glow_intensity * 30.0),
            });
        }
    }
}

impl VisualizationEngine for CircleEngine {
    fn kind(&self) -> VisualizationType {
        VisualizationType::Circle
    }

    fn render(&mut self, surface: &mut dyn Surface, frame: &AnalysisFrame) {
        let (width, height) = surface.size();
        if width != self.geometry.width || height != self.geometry.height {
            self.resize(width, height);
        }
        if self.particles.len() != self.settings.particle_count as usize {
            self.allocate();
        }

        fade(surface, &self.settings);
        self.effects.update(frame, &self.settings);
        self.rotation += self.settings.rotation_speed * ROTATION_STEP;

        let bins = frame.frequency_data.len();
        let count = self.particles.len();
        let sensitivity = self.settings.sensitivity;
        let smoothing = self.settings.smoothing;
        let boost = 1.0 + self.effects.beat_pulse * 0.3;
        let g = self.geometry;

        for (i, particle) in self.particles.iter_mut().enumerate() {
            let level = bin_level(&frame.frequency_data, element_bin(i, count, bins)) * sensitivity;
            particle.target_radius = g.base_radius + level * g.max_offset * boost;
            particle.radius = smooth(particle.radius, particle.target_radius, smoothing);
            particle.intensity = smooth(particle.intensity, level.min(1.0), smoothing);
        }

        self.draw_particles(surface);
        self.draw_overlays(surface, frame);
    }

    fn update_settings(&mut self, patch: &SettingsPatch) {
        let next = self.settings.merged(patch);
        let previous = std::mem::replace(&mut self.settings, next);
        if previous.particle_count != self.settings.particle_count {
            self.particles.clear();
        } else if previous.color_theme != self.settings.color_theme {
            self.recolor();
        }
        if previous.size_scale != self.settings.size_scale {
            // Force geometry to be recomputed on the next frame
            self.geometry = Geometry::default();
        }
    }

    fn settings(&self) -> &VisualizationSettings {
        &self.settings
    }

    fn cleanup(&mut self) {
        self.particles.clear();
        self.rotation = 0.0;
        self.effects = FrameEffects::default();
        self.geometry = Geometry::default();
    }

    fn element_count(&self) -> usize {
        self.particles.len()
    }

    fn effects(&self) -> FrameEffects {
        self.effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::surface::DrawList;

    fn frame(level: u8, beat: bool) -> AnalysisFrame {
        AnalysisFrame {
            frequency_data: vec![level; 1024],
            time_data: vec![128; 1024],
            beat,
            ..Default::default()
        }
    }

    #[test]
    fn test_beat_pulse_snaps_and_decays() {
        let mut engine = CircleEngine::new(VisualizationSettings {
            particle_count: 64,
            pulse_beat_sync: true,
            ..Default::default()
        });
        let mut surface = DrawList::new(800.0, 600.0);

        engine.render(&mut surface, &frame(255, true));
        assert_eq!(engine.effects().beat_pulse, 1.0);
        assert_eq!(engine.element_count(), 64);

        let mut expected = 1.0f32;
        for _ in 0..20 {
            engine.render(&mut surface, &frame(255, false));
            expected *= 0.9;
            let pulse = engine.effects().beat_pulse;
            assert!(pulse >= 0.0);
            assert!((pulse - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rotation_accumulates() {
        let mut engine = CircleEngine::new(VisualizationSettings {
            rotation_speed: 2.0,
            ..Default::default()
        });
        let mut surface = DrawList::new(400.0, 400.0);
        for _ in 0..10 {
            engine.render(&mut surface, &frame(0, false));
        }
        assert!((engine.rotation() - 0.2).abs() < 1e-5);

        engine.cleanup();
        assert_eq!(engine.rotation(), 0.0);
        assert_eq!(engine.element_count(), 0);
    }

    #[test]
    fn test_silent_particles_not_drawn() {
        let mut engine = CircleEngine::new(VisualizationSettings::default());
        let mut surface = DrawList::new(400.0, 400.0);
        engine.render(&mut surface, &frame(0, false));

        // Only the background fade
        assert_eq!(surface.len(), 1);
    }

    #[test]
    fn test_loud_particles_draw_spokes() {
        let mut engine = CircleEngine::new(VisualizationSettings {
            smoothing: 0.0,
            ..Default::default()
        });
        let mut surface = DrawList::new(400.0, 400.0);
        engine.render(&mut surface, &frame(255, false));

        let spokes = surface
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::Line { .. }))
            .count();
        assert_eq!(spokes, 64);
    }

    #[test]
    fn test_particle_count_change_reallocates() {
        let mut engine = CircleEngine::new(VisualizationSettings::default());
        let mut surface = DrawList::new(400.0, 400.0);
        engine.render(&mut surface, &frame(100, false));

        engine.update_settings(&SettingsPatch::particle_count(16));
        engine.render(&mut surface, &frame(100, false));
        assert_eq!(engine.element_count(), 16);
    }
}
