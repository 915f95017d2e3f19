//! Configuration file management.
//!
//! Handles loading and saving user preferences to `~/.beat-viz.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use beat_viz_core::{AnalyzerConfig, SettingsPatch, SynthConfig};
use beat_viz_core::audio::graph::Waveform;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const DEFAULT_DEVICE_TIMEOUT_SECS: u64 = 3;

const CONFIG_TEMPLATE: &str = r#"# beat-viz configuration file

# Timeout in seconds when opening an audio device (default: 3)
# device_timeout_secs = 3

# Last selected input device (auto-saved)
# last_device = "Device Name"

# =============================================================================
# Analysis
# =============================================================================

# beat_threshold = 0.15           # Volume (RMS) jump between frames; the volume must
                                  # also exceed 1.3x its recent average
# onset_threshold = 0.1           # Volume jump between consecutive frames
# fft_size = 2048                 # Power of two between 32 and 32768
# smoothing_time_constant = 0.8   # Analyser spectrum smoothing, 0..1

# =============================================================================
# Keyboard synth
# =============================================================================

# attack = 0.02                   # Seconds
# decay = 0.1                     # Seconds
# sustain = 0.7                   # Fraction of note velocity
# release = 0.3                   # Seconds
# reverb_amount = 0.3             # Wet mix, 0..1
# waveform = "sine"               # sine, square, sawtooth, triangle

# =============================================================================
# Visualization
# =============================================================================

# [visualization]
# type = "CIRCLE"                 # CIRCLE, BARS, WAVE
# colorTheme = "NEON"             # NEON, SUNSET, MONO
# sensitivity = 1.0
# smoothing = 0.8
# sizeScale = 0.7
# particleCount = 64
# glowIntensity = 0.5
# backgroundOpacity = 0.3
# rotationSpeed = 0.5
# pulseBeatSync = true
# flashOnset = true
"#;

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Config {
    pub last_device: Option<String>,
    pub device_timeout_secs: Option<u64>,

    // Analyzer (flattened for simpler TOML)
    pub beat_threshold: Option<f32>,
    pub onset_threshold: Option<f32>,
    pub fft_size: Option<usize>,
    pub smoothing_time_constant: Option<f32>,

    // Keyboard synth
    pub attack: Option<f32>,
    pub decay: Option<f32>,
    pub sustain: Option<f32>,
    pub release: Option<f32>,
    pub reverb_amount: Option<f32>,
    pub waveform: Option<Waveform>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<SettingsPatch>,
}

impl Config {
    fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".beat-viz.toml"))
    }

    /// Load from the home directory, writing the template on first run.
    /// Unreadable or invalid files fall back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };

        if !path.exists() {
            match fs::write(&path, CONFIG_TEMPLATE) {
                Ok(()) => info!(?path, "created config template"),
                Err(e) => warn!(?path, error = %e, "could not write config template"),
            }
        }

        Self::load_from(&path).unwrap_or_else(|e| {
            warn!(error = %format!("{e:#}"), "using default config");
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self) {
        if let Some(path) = Self::path() {
            match self.save_to(&path) {
                Ok(()) => info!(?path, "config saved"),
                Err(e) => warn!(error = %format!("{e:#}"), "could not save config"),
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string(self).context("serializing config")?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))
    }

    pub fn set_device(&mut self, name: &str) {
        self.last_device = Some(name.to_string());
        self.save();
    }

    pub fn device_timeout_secs(&self) -> u64 {
        self.device_timeout_secs
            .unwrap_or(DEFAULT_DEVICE_TIMEOUT_SECS)
    }

    pub fn analyzer(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            beat_threshold: self.beat_threshold,
            onset_threshold: self.onset_threshold,
            fft_size: self.fft_size,
            smoothing_time_constant: self.smoothing_time_constant,
        }
    }

    pub fn synth(&self) -> SynthConfig {
        SynthConfig {
            attack: self.attack,
            decay: self.decay,
            sustain: self.sustain,
            release: self.release,
            reverb_amount: self.reverb_amount,
            waveform: self.waveform,
        }
    }

    /// Saved visualization overrides, empty when none were configured
    pub fn visualization(&self) -> SettingsPatch {
        self.visualization.clone().unwrap_or_default()
    }
}
