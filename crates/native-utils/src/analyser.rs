use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;

pub const FFT_SIZE: usize = 1024;
pub const SMOOTHING: f32 = 0.8;
pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

/// Byte-scaled magnitude spectrum, computed the way a browser AnalyserNode
/// does for `getByteFrequencyData`.
pub struct SpectrumAnalyser {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    /// Smoothed linear magnitudes, one per bin.
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        Self {
            fft,
            window: blackman(FFT_SIZE),
            input,
            spectrum,
            smoothed: vec![0.0; FFT_SIZE / 2],
        }
    }

    pub fn bin_count(&self) -> usize {
        FFT_SIZE / 2
    }

    /// Analyses the most recent `FFT_SIZE` samples (zero-padded at the front
    /// when fewer are given) and writes one byte per bin into `bins`.
    pub fn byte_frequency_data(&mut self, samples: &[f32], bins: &mut [u8]) -> anyhow::Result<()> {
        let recent = &samples[samples.len().saturating_sub(FFT_SIZE)..];
        let offset = FFT_SIZE - recent.len();
        self.input[..offset].fill(0.0);
        for (i, sample) in recent.iter().enumerate() {
            self.input[offset + i] = sample * self.window[offset + i];
        }

        self.fft.process(&mut self.input, &mut self.spectrum)?;

        let scale = 1.0 / FFT_SIZE as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[k].norm() * scale;
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;

            if let Some(bin) = bins.get_mut(k) {
                let db = 20.0 * smoothed.max(f32::MIN_POSITIVE).log10();
                let scaled = 255.0 / range * (db - MIN_DECIBELS);
                *bin = scaled.clamp(0.0, 255.0) as u8;
            }
        }
        Ok(())
    }
}

impl Default for SpectrumAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

fn blackman(size: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42, 0.5, 0.08);
    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}
