//! Tunables for the analyzer and the keyboard synth.
//!
//! Every field is optional so partial TOML tables deserialize cleanly; the
//! getters supply the defaults.

use serde::{Deserialize, Serialize};

use crate::audio::graph::{Waveform, DEFAULT_FFT_SIZE, DEFAULT_SMOOTHING_TIME_CONSTANT};

/// Analyzer thresholds and analyser node shape
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AnalyzerConfig {
    pub beat_threshold: Option<f32>,
    pub onset_threshold: Option<f32>,
    pub fft_size: Option<usize>,
    pub smoothing_time_constant: Option<f32>,
}

impl AnalyzerConfig {
    pub fn beat_threshold(&self) -> f32 {
        self.beat_threshold.unwrap_or(0.15)
    }
    pub fn onset_threshold(&self) -> f32 {
        self.onset_threshold.unwrap_or(0.1)
    }
    pub fn fft_size(&self) -> usize {
        self.fft_size.unwrap_or(DEFAULT_FFT_SIZE)
    }
    pub fn smoothing_time_constant(&self) -> f32 {
        self.smoothing_time_constant
            .unwrap_or(DEFAULT_SMOOTHING_TIME_CONSTANT)
    }
}

/// Keyboard synth envelope, reverb mix and oscillator shape
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SynthConfig {
    pub attack: Option<f32>,
    pub decay: Option<f32>,
    pub sustain: Option<f32>,
    pub release: Option<f32>,
    pub reverb_amount: Option<f32>,
    pub waveform: Option<Waveform>,
}

impl SynthConfig {
    // Envelope times in seconds
    pub fn attack(&self) -> f32 {
        self.attack.unwrap_or(0.02)
    }
    pub fn decay(&self) -> f32 {
        self.decay.unwrap_or(0.1)
    }
    /// Sustain level as a fraction of note velocity
    pub fn sustain(&self) -> f32 {
        self.sustain.unwrap_or(0.7)
    }
    pub fn release(&self) -> f32 {
        self.release.unwrap_or(0.3)
    }
    pub fn reverb_amount(&self) -> f32 {
        self.reverb_amount.unwrap_or(0.3)
    }
    pub fn waveform(&self) -> Waveform {
        self.waveform.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = AnalyzerConfig {
            beat_threshold: Some(0.3),
            ..Default::default()
        };
        assert_eq!(config.beat_threshold(), 0.3);
        assert_eq!(config.onset_threshold(), 0.1);
        assert_eq!(config.fft_size(), 2048);

        let synth = SynthConfig::default();
        assert_eq!(synth.waveform(), Waveform::Sine);
        assert_eq!(synth.release(), 0.3);
    }
}
