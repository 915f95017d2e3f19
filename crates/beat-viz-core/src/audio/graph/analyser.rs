//! Analyser node: keeps the most recent `fft_size` samples and turns them into
//! byte spectra and byte waveforms.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::GraphError;

/// Lower edge of the byte magnitude scale
const MIN_DECIBELS: f32 = -100.0;
/// Upper edge of the byte magnitude scale
const MAX_DECIBELS: f32 = -30.0;

pub(crate) struct AnalyserState {
    fft_size: usize,
    smoothing: f32,
    fft: Arc<dyn Fft<f32>>,
    // Pre-computed Blackman window
    window: Vec<f32>,
    // Circular time-domain history, `write_pos` is the oldest sample
    history: Vec<f32>,
    write_pos: usize,
    fft_buffer: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl AnalyserState {
    pub fn new(fft_size: usize, smoothing: f32) -> Result<Self, GraphError> {
        if !fft_size.is_power_of_two() || !(32..=32768).contains(&fft_size) {
            return Err(GraphError::InvalidFftSize(fft_size));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let x = std::f32::consts::TAU * i as f32 / fft_size as f32;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Ok(Self {
            fft_size,
            smoothing: smoothing.clamp(0.0, 1.0),
            fft,
            window,
            history: vec![0.0; fft_size],
            write_pos: 0,
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
        })
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Record a block of samples flowing through the node
    pub fn push(&mut self, block: &[f32]) {
        for &sample in block {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    fn sample(&self, i: usize) -> f32 {
        self.history[(self.write_pos + i) % self.fft_size]
    }

    /// Windowed FFT, temporally smoothed, mapped from dB to 0..255
    pub fn byte_frequency_data(&mut self, out: &mut [u8]) {
        for i in 0..self.fft_size {
            self.fft_buffer[i] = Complex::new(self.sample(i) * self.window[i], 0.0);
        }
        self.fft.process(&mut self.fft_buffer);

        let scale = 1.0 / self.fft_size as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.fft_buffer[k].norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;

            if let Some(slot) = out.get_mut(k) {
                let db = 20.0 * (*smoothed + 1e-12).log10();
                let scaled = 255.0 / range * (db - MIN_DECIBELS);
                *slot = scaled.clamp(0.0, 255.0) as u8;
            }
        }
    }

    /// Most recent samples as unsigned bytes centered on 128
    pub fn byte_time_domain_data(&self, out: &mut [u8]) {
        let offset = self.fft_size.saturating_sub(out.len());
        for (i, slot) in out.iter_mut().enumerate().take(self.fft_size) {
            let sample = self.sample(offset + i);
            *slot = (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_fft_size() {
        assert!(AnalyserState::new(1000, 0.8).is_err());
        assert!(AnalyserState::new(16, 0.8).is_err());
        assert!(AnalyserState::new(2048, 0.8).is_ok());
    }

    #[test]
    fn test_silence_maps_to_center_and_zero() {
        let mut analyser = AnalyserState::new(256, 0.0).unwrap();
        analyser.push(&[0.0; 256]);

        let mut time = vec![0u8; 256];
        analyser.byte_time_domain_data(&mut time);
        assert!(time.iter().all(|&b| b == 128));

        let mut freq = vec![0u8; 128];
        analyser.byte_frequency_data(&mut freq);
        assert!(freq.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tone_peaks_at_its_bin() {
        let fft_size = 1024;
        let mut analyser = AnalyserState::new(fft_size, 0.0).unwrap();

        // Quiet tone centered exactly on bin 64
        let block: Vec<f32> = (0..fft_size)
            .map(|i| 0.01 * (std::f32::consts::TAU * 64.0 * i as f32 / fft_size as f32).sin())
            .collect();
        analyser.push(&block);

        let mut freq = vec![0u8; fft_size / 2];
        analyser.byte_frequency_data(&mut freq);

        let peak = freq
            .iter()
            .enumerate()
            .max_by_key(|&(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 64);
        assert!(freq[64] > 120);
        assert!(freq[400] < freq[64] / 2);
    }

    #[test]
    fn test_time_domain_reads_latest_samples() {
        let mut analyser = AnalyserState::new(32, 0.0).unwrap();
        analyser.push(&[0.0; 32]);
        analyser.push(&[0.5; 4]);

        let mut time = vec![0u8; 32];
        analyser.byte_time_domain_data(&mut time);
        assert_eq!(&time[28..], &[192, 192, 192, 192]);
        assert_eq!(time[0], 128);
    }
}
