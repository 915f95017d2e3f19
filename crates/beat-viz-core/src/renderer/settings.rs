//! Visualization settings and partial updates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VisualizationType {
    #[default]
    Circle,
    Bars,
    Wave,
}

impl VisualizationType {
    pub const ALL: [VisualizationType; 3] = [
        VisualizationType::Circle,
        VisualizationType::Bars,
        VisualizationType::Wave,
    ];

    /// Next type in cycling order
    pub fn next(self) -> Self {
        match self {
            VisualizationType::Circle => VisualizationType::Bars,
            VisualizationType::Bars => VisualizationType::Wave,
            VisualizationType::Wave => VisualizationType::Circle,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VisualizationType::Circle => "circle",
            VisualizationType::Bars => "bars",
            VisualizationType::Wave => "wave",
        }
    }
}

impl fmt::Display for VisualizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VisualizationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown visualization '{}' (expected circle, bars or wave)", s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColorTheme {
    #[default]
    Neon,
    Sunset,
    Mono,
}

impl ColorTheme {
    pub const ALL: [ColorTheme; 3] = [ColorTheme::Neon, ColorTheme::Sunset, ColorTheme::Mono];

    pub fn next(self) -> Self {
        match self {
            ColorTheme::Neon => ColorTheme::Sunset,
            ColorTheme::Sunset => ColorTheme::Mono,
            ColorTheme::Mono => ColorTheme::Neon,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorTheme::Neon => "neon",
            ColorTheme::Sunset => "sunset",
            ColorTheme::Mono => "mono",
        }
    }
}

impl fmt::Display for ColorTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorTheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown theme '{}' (expected neon, sunset or mono)", s))
    }
}

/// Everything an engine reads each frame. Treated as an immutable value:
/// changes produce a new value through [`VisualizationSettings::merged`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualizationSettings {
    #[serde(rename = "type")]
    pub kind: VisualizationType,
    pub color_theme: ColorTheme,
    pub sensitivity: f32,
    pub smoothing: f32,
    pub size_scale: f32,
    pub particle_count: u32,
    pub glow_intensity: f32,
    pub background_opacity: f32,
    pub rotation_speed: f32,
    pub pulse_beat_sync: bool,
    pub flash_onset: bool,
}

impl Default for VisualizationSettings {
    fn default() -> Self {
        Self {
            kind: VisualizationType::Circle,
            color_theme: ColorTheme::Neon,
            sensitivity: 1.0,
            smoothing: 0.8,
            size_scale: 0.7,
            particle_count: 64,
            glow_intensity: 0.5,
            background_opacity: 0.3,
            rotation_speed: 0.5,
            pulse_beat_sync: true,
            flash_onset: true,
        }
    }
}

impl VisualizationSettings {
    /// Pull every numeric field into its supported range
    pub fn clamped(mut self) -> Self {
        self.sensitivity = self.sensitivity.clamp(0.1, 5.0);
        self.smoothing = self.smoothing.clamp(0.0, 0.99);
        self.size_scale = self.size_scale.clamp(0.1, 2.0);
        self.particle_count = self.particle_count.clamp(8, 256);
        self.glow_intensity = self.glow_intensity.clamp(0.0, 1.0);
        self.background_opacity = self.background_opacity.clamp(0.0, 1.0);
        self.rotation_speed = self.rotation_speed.clamp(-2.0, 2.0);
        self
    }

    /// New settings with the patch's fields applied, then clamped
    pub fn merged(&self, patch: &SettingsPatch) -> Self {
        Self {
            kind: patch.kind.unwrap_or(self.kind),
            color_theme: patch.color_theme.unwrap_or(self.color_theme),
            sensitivity: patch.sensitivity.unwrap_or(self.sensitivity),
            smoothing: patch.smoothing.unwrap_or(self.smoothing),
            size_scale: patch.size_scale.unwrap_or(self.size_scale),
            particle_count: patch.particle_count.unwrap_or(self.particle_count),
            glow_intensity: patch.glow_intensity.unwrap_or(self.glow_intensity),
            background_opacity: patch.background_opacity.unwrap_or(self.background_opacity),
            rotation_speed: patch.rotation_speed.unwrap_or(self.rotation_speed),
            pulse_beat_sync: patch.pulse_beat_sync.unwrap_or(self.pulse_beat_sync),
            flash_onset: patch.flash_onset.unwrap_or(self.flash_onset),
        }
        .clamped()
    }
}

/// Partial settings update
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<VisualizationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_theme: Option<ColorTheme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub particle_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glow_intensity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_opacity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_beat_sync: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash_onset: Option<bool>,
}

impl SettingsPatch {
    pub fn kind(kind: VisualizationType) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn theme(theme: ColorTheme) -> Self {
        Self {
            color_theme: Some(theme),
            ..Default::default()
        }
    }

    pub fn particle_count(count: u32) -> Self {
        Self {
            particle_count: Some(count),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_clamps_out_of_range() {
        let patch = SettingsPatch {
            sensitivity: Some(50.0),
            smoothing: Some(1.5),
            particle_count: Some(2),
            rotation_speed: Some(-9.0),
            ..Default::default()
        };
        let merged = VisualizationSettings::default().merged(&patch);
        assert_eq!(merged.sensitivity, 5.0);
        assert_eq!(merged.smoothing, 0.99);
        assert_eq!(merged.particle_count, 8);
        assert_eq!(merged.rotation_speed, -2.0);
    }

    #[test]
    fn test_merge_leaves_original_untouched() {
        let original = VisualizationSettings::default();
        let merged = original.merged(&SettingsPatch::theme(ColorTheme::Mono));
        assert_eq!(original.color_theme, ColorTheme::Neon);
        assert_eq!(merged.color_theme, ColorTheme::Mono);
        assert_eq!(merged.particle_count, original.particle_count);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("BARS".parse::<VisualizationType>(), Ok(VisualizationType::Bars));
        assert_eq!("sunset".parse::<ColorTheme>(), Ok(ColorTheme::Sunset));
        assert!("spiral".parse::<VisualizationType>().is_err());
    }

    #[test]
    fn test_cycling_covers_all() {
        let mut kind = VisualizationType::Circle;
        for _ in 0..3 {
            kind = kind.next();
        }
        assert_eq!(kind, VisualizationType::Circle);
        assert_eq!(ColorTheme::Mono.next(), ColorTheme::Neon);
    }
}
