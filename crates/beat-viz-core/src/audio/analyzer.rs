//! Per-frame feature extraction.
//!
//! Turns the byte spectrum and byte waveform of an analyser tap into volume,
//! beat, onset, spectral centroid and three band energies. The only state kept
//! between frames is the previous volume and a short volume history.

use std::collections::VecDeque;

use super::graph::{NodeId, SharedContext};
use crate::config::AnalyzerConfig;

/// Volume samples needed before beat detection is armed
pub const HISTORY_SIZE: usize = 10;

/// A beat must exceed the recent mean volume by this factor
const BEAT_ELEVATION: f32 = 1.3;

/// Analysis results for a single frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnalysisFrame {
    pub frequency_data: Vec<u8>,
    pub time_data: Vec<u8>,
    /// RMS of the centered waveform, 0.0 - 1.0
    pub volume: f32,
    pub beat: bool,
    pub onset: bool,
    /// Magnitude-weighted mean bin index
    pub spectral_centroid: f32,
    pub bass_energy: f32,
    pub mid_energy: f32,
    pub high_energy: f32,
}

/// The analyser node a source exposes for reading.
///
/// Reads take the context lock briefly; a released node reads as silence.
#[derive(Clone)]
pub struct AnalyzerTap {
    context: SharedContext,
    node: NodeId,
}

impl AnalyzerTap {
    pub(crate) fn new(context: SharedContext, node: NodeId) -> Self {
        Self { context, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.context
            .lock()
            .frequency_bin_count(self.node)
            .unwrap_or(0)
    }

    pub fn read_frequency(&self, out: &mut [u8]) {
        if self.context.lock().byte_frequency_data(self.node, out).is_err() {
            out.fill(0);
        }
    }

    pub fn read_time_domain(&self, out: &mut [u8]) {
        if self
            .context
            .lock()
            .byte_time_domain_data(self.node, out)
            .is_err()
        {
            out.fill(128);
        }
    }
}

impl std::fmt::Debug for AnalyzerTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerTap").field("node", &self.node).finish()
    }
}

pub struct AnalyzerEngine {
    previous_volume: f32,
    volume_history: VecDeque<f32>,
    beat_threshold: f32,
    onset_threshold: f32,
    // Tap read buffers, sized to the tap's bin count
    frequency_buffer: Vec<u8>,
    time_buffer: Vec<u8>,
}

impl Default for AnalyzerEngine {
    fn default() -> Self {
        Self::new(&AnalyzerConfig::default())
    }
}

impl AnalyzerEngine {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let mut engine = Self {
            previous_volume: 0.0,
            volume_history: VecDeque::with_capacity(HISTORY_SIZE),
            beat_threshold: 0.0,
            onset_threshold: 0.0,
            frequency_buffer: Vec::new(),
            time_buffer: Vec::new(),
        };
        engine.set_beat_threshold(config.beat_threshold());
        engine.set_onset_threshold(config.onset_threshold());
        engine
    }

    pub fn set_beat_threshold(&mut self, threshold: f32) {
        self.beat_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn set_onset_threshold(&mut self, threshold: f32) {
        self.onset_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn beat_threshold(&self) -> f32 {
        self.beat_threshold
    }

    pub fn onset_threshold(&self) -> f32 {
        self.onset_threshold
    }

    pub fn previous_volume(&self) -> f32 {
        self.previous_volume
    }

    pub fn history_len(&self) -> usize {
        self.volume_history.len()
    }

    /// Read the tap and analyze what it currently holds
    pub fn analyze_tap(&mut self, tap: &AnalyzerTap) -> AnalysisFrame {
        let bins = tap.frequency_bin_count();
        if bins != self.frequency_buffer.len() {
            self.frequency_buffer = vec![0; bins];
            self.time_buffer = vec![128; bins];
        }

        tap.read_frequency(&mut self.frequency_buffer);
        tap.read_time_domain(&mut self.time_buffer);

        let frequency = std::mem::take(&mut self.frequency_buffer);
        let time = std::mem::take(&mut self.time_buffer);
        let frame = self.analyze(&frequency, &time);
        self.frequency_buffer = frequency;
        self.time_buffer = time;
        frame
    }

    /// Analyze one frame of byte spectrum and byte waveform.
    ///
    /// Both slices are expected to have the same length.
    pub fn analyze(&mut self, frequency: &[u8], time: &[u8]) -> AnalysisFrame {
        debug_assert_eq!(
            frequency.len(),
            time.len(),
            "frequency and time buffers must match"
        );

        let volume = rms_volume(time);

        self.volume_history.push_back(volume);
        if self.volume_history.len() > HISTORY_SIZE {
            self.volume_history.pop_front();
        }

        let beat = self.detect_beat(volume);
        let onset = volume - self.previous_volume > self.onset_threshold;
        let (bass_energy, mid_energy, high_energy) = band_energies(frequency);
        let spectral_centroid = spectral_centroid(frequency);

        self.previous_volume = volume;

        AnalysisFrame {
            frequency_data: frequency.to_vec(),
            time_data: time.to_vec(),
            volume,
            beat,
            onset,
            spectral_centroid,
            bass_energy,
            mid_energy,
            high_energy,
        }
    }

    fn detect_beat(&self, volume: f32) -> bool {
        if self.volume_history.len() < HISTORY_SIZE {
            return false;
        }
        let average =
            self.volume_history.iter().sum::<f32>() / self.volume_history.len() as f32;
        volume - self.previous_volume > self.beat_threshold && volume > average * BEAT_ELEVATION
    }
}

/// RMS of byte samples centered on 128
pub fn rms_volume(time: &[u8]) -> f32 {
    if time.is_empty() {
        return 0.0;
    }
    let sum: f32 = time
        .iter()
        .map(|&b| {
            let s = (b as f32 - 128.0) / 128.0;
            s * s
        })
        .sum();
    (sum / time.len() as f32).sqrt()
}

fn band_energies(frequency: &[u8]) -> (f32, f32, f32) {
    let n = frequency.len();
    let bass_end = n / 10;
    let mid_end = n / 2;
    (
        band_mean(&frequency[..bass_end]),
        band_mean(&frequency[bass_end..mid_end]),
        band_mean(&frequency[mid_end..]),
    )
}

fn band_mean(band: &[u8]) -> f32 {
    if band.is_empty() {
        return 0.0;
    }
    let sum: u32 = band.iter().map(|&b| b as u32).sum();
    sum as f32 / band.len() as f32 / 255.0
}

fn spectral_centroid(frequency: &[u8]) -> f32 {
    let mut weighted = 0.0f64;
    let mut total = 0.0f64;
    for (i, &m) in frequency.iter().enumerate() {
        weighted += m as f64 * i as f64;
        total += m as f64;
    }
    if total == 0.0 {
        0.0
    } else {
        (weighted / total) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINS: usize = 64;

    /// Waveform whose RMS is `offset / 128`
    fn time_with_offset(offset: u8) -> Vec<u8> {
        (0..BINS)
            .map(|i| if i % 2 == 0 { 128 + offset } else { 128 - offset })
            .collect()
    }

    fn silence() -> (Vec<u8>, Vec<u8>) {
        (vec![0; BINS], vec![128; BINS])
    }

    #[test]
    fn test_silence_is_quiet() {
        let mut engine = AnalyzerEngine::default();
        let (freq, time) = silence();
        for _ in 0..20 {
            let frame = engine.analyze(&freq, &time);
            assert_eq!(frame.volume, 0.0);
            assert!(!frame.beat);
            assert!(!frame.onset);
            assert_eq!(frame.spectral_centroid, 0.0);
        }
    }

    #[test]
    fn test_beat_needs_full_history() {
        let mut engine = AnalyzerEngine::default();
        engine.set_beat_threshold(0.0);
        let freq = vec![0; BINS];

        // Every frame louder than the last, but no beat before ten samples
        for step in 0..HISTORY_SIZE - 1 {
            let frame = engine.analyze(&freq, &time_with_offset((step * 12) as u8));
            assert!(!frame.beat, "beat fired at sample {}", step + 1);
        }
        assert_eq!(engine.history_len(), HISTORY_SIZE - 1);
    }

    #[test]
    fn test_beat_after_quiet_history() {
        let mut engine = AnalyzerEngine::default();
        engine.set_beat_threshold(0.2);
        let freq = vec![0; BINS];

        for _ in 0..HISTORY_SIZE - 1 {
            assert!(!engine.analyze(&freq, &time_with_offset(13)).beat);
        }
        assert!((engine.previous_volume() - 0.1016).abs() < 1e-3);

        let frame = engine.analyze(&freq, &time_with_offset(64));
        assert!((frame.volume - 0.5).abs() < 1e-6);
        assert!(frame.beat);
        assert!(frame.onset);
    }

    #[test]
    fn test_onset_on_first_call() {
        let mut engine = AnalyzerEngine::default();
        engine.set_onset_threshold(0.2);

        let frame = engine.analyze(&[0; BINS], &time_with_offset(38));
        assert!((frame.volume - 0.297).abs() < 1e-3);
        assert!(frame.onset);
        assert!(!frame.beat);
    }

    #[test]
    fn test_threshold_setters_clamp() {
        let mut engine = AnalyzerEngine::default();
        engine.set_beat_threshold(-1.0);
        assert_eq!(engine.beat_threshold(), 0.0);
        engine.set_beat_threshold(5.0);
        assert_eq!(engine.beat_threshold(), 1.0);
        engine.set_onset_threshold(2.0);
        assert_eq!(engine.onset_threshold(), 1.0);
    }

    #[test]
    fn test_band_split() {
        let mut engine = AnalyzerEngine::default();
        let mut freq = vec![0u8; 100];
        freq[..10].fill(255);
        freq[10..50].fill(51);

        let frame = engine.analyze(&freq, &[128; 100]);
        assert_eq!(frame.bass_energy, 1.0);
        assert!((frame.mid_energy - 0.2).abs() < 1e-6);
        assert_eq!(frame.high_energy, 0.0);
    }

    #[test]
    fn test_tiny_spectrum_has_empty_bass() {
        let mut engine = AnalyzerEngine::default();
        let frame = engine.analyze(&[200, 200, 200], &[128; 3]);
        assert_eq!(frame.bass_energy, 0.0);
        assert!(frame.mid_energy > 0.0);
    }

    #[test]
    fn test_centroid_of_single_bin() {
        let mut engine = AnalyzerEngine::default();
        let mut freq = vec![0u8; BINS];
        freq[20] = 100;
        let frame = engine.analyze(&freq, &[128; BINS]);
        assert_eq!(frame.spectral_centroid, 20.0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Uniform spectra spread their energy evenly across the bands
        #[test]
        fn uniform_spectrum_has_equal_bands(level in 1u8..=255, bins in 10usize..512) {
            let mut engine = AnalyzerEngine::default();
            let freq = vec![level; bins];
            let frame = engine.analyze(&freq, &vec![128; bins]);
            prop_assert!((frame.bass_energy - frame.mid_energy).abs() < 1e-6);
            prop_assert!((frame.mid_energy - frame.high_energy).abs() < 1e-6);
        }

        /// Beat never fires before the history is full
        #[test]
        fn no_beat_during_warm_up(volumes in prop::collection::vec(0u8..=127, 1..HISTORY_SIZE)) {
            let mut engine = AnalyzerEngine::default();
            engine.set_beat_threshold(0.0);
            for offset in volumes {
                let time: Vec<u8> = (0..32).map(|i| if i % 2 == 0 { 128 + offset } else { 128 - offset }).collect();
                let frame = engine.analyze(&[0; 32], &time);
                prop_assert!(!frame.beat);
            }
        }

        /// Volume stays in range for any waveform
        #[test]
        fn volume_in_unit_range(time in prop::collection::vec(any::<u8>(), 1..256)) {
            let mut engine = AnalyzerEngine::default();
            let frame = engine.analyze(&vec![0; time.len()], &time);
            prop_assert!((0.0..=1.0).contains(&frame.volume));
        }
    }
}
