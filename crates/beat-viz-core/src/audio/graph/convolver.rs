//! Uniformly partitioned overlap-save convolution.
//!
//! The impulse response is split into blocks of one render quantum. Each block
//! is transformed once up front; every quantum the input spectrum is pushed into
//! a frequency-domain delay line and multiplied against all partitions.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::{AudioBuffer, RENDER_QUANTUM};

const BLOCK: usize = RENDER_QUANTUM;
const FFT_LEN: usize = BLOCK * 2;

/// Matches the loudness calibration the platform convolver applies to normalized impulses
const GAIN_CALIBRATION: f32 = 0.00125;
const MIN_POWER: f32 = 0.000125;

pub(crate) struct Convolver {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    partitions: Vec<Vec<Complex<f32>>>,
    // Frequency-domain delay line, `head` is the newest spectrum
    delay_line: Vec<Vec<Complex<f32>>>,
    head: usize,
    previous: [f32; BLOCK],
    scratch: Vec<Complex<f32>>,
    accumulator: Vec<Complex<f32>>,
}

impl Convolver {
    pub fn new(impulse: &AudioBuffer) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_LEN);
        let ifft = planner.plan_fft_inverse(FFT_LEN);

        let scale = normalization_scale(impulse.samples());
        let partitions: Vec<Vec<Complex<f32>>> = impulse
            .samples()
            .chunks(BLOCK)
            .map(|chunk| {
                let mut spectrum = vec![Complex::new(0.0, 0.0); FFT_LEN];
                for (slot, &s) in spectrum.iter_mut().zip(chunk) {
                    *slot = Complex::new(s * scale, 0.0);
                }
                fft.process(&mut spectrum);
                spectrum
            })
            .collect();

        let delay_line = vec![vec![Complex::new(0.0, 0.0); FFT_LEN]; partitions.len().max(1)];

        Self {
            fft,
            ifft,
            partitions,
            delay_line,
            head: 0,
            previous: [0.0; BLOCK],
            scratch: vec![Complex::new(0.0, 0.0); FFT_LEN],
            accumulator: vec![Complex::new(0.0, 0.0); FFT_LEN],
        }
    }

    pub fn process(&mut self, input: &[f32; BLOCK], out: &mut [f32; BLOCK]) {
        if self.partitions.is_empty() {
            out.fill(0.0);
            return;
        }

        let count = self.delay_line.len();
        self.head = (self.head + 1) % count;

        // Input frame is [previous block, current block]
        let frame = &mut self.delay_line[self.head];
        for i in 0..BLOCK {
            frame[i] = Complex::new(self.previous[i], 0.0);
            frame[BLOCK + i] = Complex::new(input[i], 0.0);
        }
        self.fft.process(frame);
        self.previous.copy_from_slice(input);

        self.accumulator.fill(Complex::new(0.0, 0.0));
        for (p, partition) in self.partitions.iter().enumerate() {
            let spectrum = &self.delay_line[(self.head + count - p) % count];
            for ((acc, &x), &h) in self.accumulator.iter_mut().zip(spectrum).zip(partition) {
                *acc += x * h;
            }
        }

        self.scratch.copy_from_slice(&self.accumulator);
        self.ifft.process(&mut self.scratch);

        // Second half is the valid (non-aliased) part
        let norm = 1.0 / FFT_LEN as f32;
        for (o, c) in out.iter_mut().zip(&self.scratch[BLOCK..]) {
            *o = c.re * norm;
        }
    }
}

fn normalization_scale(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 1.0;
    }
    let power = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
    GAIN_CALIBRATION / power.max(MIN_POWER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_convolution(signal: &[f32], ir: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; signal.len()];
        for n in 0..signal.len() {
            for (k, &h) in ir.iter().enumerate() {
                if k <= n {
                    out[n] += signal[n - k] * h;
                }
            }
        }
        out
    }

    #[test]
    fn test_matches_direct_convolution() {
        // Impulse longer than one partition
        let ir: Vec<f32> = (0..300).map(|i| ((i * 7 % 13) as f32 - 6.0) / 6.0).collect();
        let signal: Vec<f32> = (0..BLOCK * 4).map(|i| ((i as f32) * 0.37).sin()).collect();

        let buffer = AudioBuffer::new(ir.clone(), 44100.0);
        let scale = normalization_scale(&ir);
        let mut convolver = Convolver::new(&buffer);

        let mut output = Vec::new();
        for chunk in signal.chunks(BLOCK) {
            let mut input = [0.0; BLOCK];
            input.copy_from_slice(chunk);
            let mut out = [0.0; BLOCK];
            convolver.process(&input, &mut out);
            output.extend_from_slice(&out);
        }

        let expected = direct_convolution(&signal, &ir);
        for (i, (got, want)) in output.iter().zip(&expected).enumerate() {
            assert!(
                (got - want * scale).abs() < 1e-4,
                "sample {}: got {}, want {}",
                i,
                got,
                want * scale
            );
        }
    }

    #[test]
    fn test_empty_impulse_is_silent() {
        let mut convolver = Convolver::new(&AudioBuffer::new(Vec::new(), 44100.0));
        let mut out = [1.0; BLOCK];
        convolver.process(&[0.5; BLOCK], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
