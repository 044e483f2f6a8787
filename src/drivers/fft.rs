use std::sync::Arc;

use rustfft::{num_complex::Complex64, Fft, FftPlanner};

use crate::config::FrequencyBand;

/// Helper that turns a window of raw samples into per-band power.
pub struct BandPowerEstimator {
    fft_size: usize,
    sample_rate_hz: f64,
    fft: Arc<dyn Fft<f64>>,
}

impl BandPowerEstimator {
    pub fn with_size(fft_size: usize, sample_rate_hz: f64) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            fft_size,
            sample_rate_hz,
            fft,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Bin centre frequencies for `0..=fft_size / 2`.
    pub fn frequencies(&self) -> Vec<f64> {
        (0..=self.fft_size / 2)
            .map(|k| k as f64 * self.sample_rate_hz / self.fft_size as f64)
            .collect()
    }

    /// One-sided power spectrum, `|X|^2 / N`. Short input is zero-padded.
    pub fn power_spectrum(&self, samples: &[f64]) -> Vec<f64> {
        let mut buffer: Vec<Complex64> = samples
            .iter()
            .copied()
            .take(self.fft_size)
            .map(|v| Complex64::new(v, 0.0))
            .collect();
        buffer.resize(self.fft_size, Complex64::new(0.0, 0.0));
        self.fft.process(&mut buffer);
        buffer
            .iter()
            .take(self.fft_size / 2 + 1)
            .map(|c| c.norm_sqr() / self.fft_size as f64)
            .collect()
    }

    /// Mean power of the bins inside the band; zero when no bin falls inside.
    pub fn band_power(&self, spectrum: &[f64], band: &FrequencyBand) -> f64 {
        let (sum, count) = self
            .frequencies()
            .iter()
            .zip(spectrum)
            .filter(|(f, _)| **f >= band.low_hz && **f <= band.high_hz)
            .fold((0.0, 0usize), |(s, n), (_, p)| (s + p, n + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn band(name: &str, low: f64, high: f64) -> FrequencyBand {
        FrequencyBand {
            name: name.into(),
            low_hz: low,
            high_hz: high,
        }
    }

    #[test]
    fn alpha_sine_lands_in_alpha_band() {
        let estimator = BandPowerEstimator::with_size(256, 250.0);
        let samples: Vec<f64> = (0..256)
            .map(|i| (2.0 * PI * 10.0 * i as f64 / 250.0).sin())
            .collect();
        let spectrum = estimator.power_spectrum(&samples);
        assert_eq!(spectrum.len(), 129);
        let alpha = estimator.band_power(&spectrum, &band("alpha", 8.0, 13.0));
        let beta = estimator.band_power(&spectrum, &band("beta", 13.0, 30.0));
        assert!(alpha > beta * 10.0, "alpha={alpha} beta={beta}");
    }

    #[test]
    fn band_outside_nyquist_is_zero() {
        let estimator = BandPowerEstimator::with_size(64, 100.0);
        let spectrum = estimator.power_spectrum(&[1.0; 64]);
        assert_eq!(estimator.band_power(&spectrum, &band("ultra", 200.0, 300.0)), 0.0);
    }
}
