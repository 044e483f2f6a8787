use std::collections::VecDeque;
use std::f64::consts::PI;

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{ClassifierConfig, FrequencyBand};
use crate::drivers::fft::BandPowerEstimator;
use crate::types::{BandPowers, ClassificationEvent, MotorClass};

/// How the classification changes on one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClassificationStep {
    /// A fresh label; the classifier publishes it.
    Switch { class: MotorClass, confidence: f64 },
    /// Small drift applied to the current confidence.
    Nudge(f64),
}

/// Anything that can drive the classifier's state each tick.
pub trait SignalSource {
    fn name(&self) -> &'static str;
    /// Updates every band/electrode value in place, keeping it within `[0, 100]`.
    fn update_band_powers(&mut self, bands: &mut BandPowers, current: &ClassificationEvent);
    fn step_classification(&mut self, current: &ClassificationEvent) -> ClassificationStep;
    /// Decoded-output activation per class, indexed by `MotorClass::index`.
    fn class_activations(&mut self, class: MotorClass) -> [f64; 5];
    /// A new attention tensor, or `None` to keep the current one.
    fn attention(&mut self, heads: usize, seq_len: usize) -> Option<Array3<f64>>;
}

/// Random positive weights normalised so every row sums to one.
pub fn row_stochastic_attention<R: Rng>(rng: &mut R, heads: usize, seq_len: usize) -> Array3<f64> {
    let mut tensor = Array3::<f64>::zeros((heads, seq_len, seq_len));
    for h in 0..heads {
        for i in 0..seq_len {
            let mut sum = 0.0;
            for j in 0..seq_len {
                // bias toward the diagonal so heads look like local attention
                let local = if i == j { 1.0 } else { 0.0 };
                let w = rng.gen_range(0.01..1.0) + local;
                tensor[[h, i, j]] = w;
                sum += w;
            }
            for j in 0..seq_len {
                tensor[[h, i, j]] /= sum;
            }
        }
    }
    tensor
}

pub fn uniform_attention(heads: usize, seq_len: usize) -> Array3<f64> {
    Array3::from_elem((heads, seq_len, seq_len), 1.0 / seq_len.max(1) as f64)
}

// ── Simulated ───────────────────────────────────────────

const SWITCH_PROBABILITY: f64 = 0.1;
const ATTENTION_PROBABILITY: f64 = 0.3;
const BAND_STEP: f64 = 5.0;
const CONFIDENCE_STEP: f64 = 0.05;

/// Random-walk source matching the dashboard's demo behaviour.
pub struct SimulatedSource {
    rng: StdRng,
}

impl SimulatedSource {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl SignalSource for SimulatedSource {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn update_band_powers(&mut self, bands: &mut BandPowers, _current: &ClassificationEvent) {
        for values in bands.values_mut() {
            for v in values.iter_mut() {
                *v = (*v + self.rng.gen_range(-BAND_STEP..=BAND_STEP)).clamp(0.0, 100.0);
            }
        }
    }

    fn step_classification(&mut self, _current: &ClassificationEvent) -> ClassificationStep {
        if self.rng.gen_bool(SWITCH_PROBABILITY) {
            let class = MotorClass::ALL[self.rng.gen_range(0..MotorClass::ALL.len())];
            let confidence = self.rng.gen_range(0.5..=1.0);
            ClassificationStep::Switch { class, confidence }
        } else {
            ClassificationStep::Nudge(self.rng.gen_range(-CONFIDENCE_STEP..=CONFIDENCE_STEP))
        }
    }

    fn class_activations(&mut self, class: MotorClass) -> [f64; 5] {
        let mut out = [0.0; 5];
        for c in MotorClass::ALL {
            out[c.index()] = if c == class {
                self.rng.gen_range(7.0..=10.0)
            } else {
                self.rng.gen_range(0.0..=5.0)
            };
        }
        out
    }

    fn attention(&mut self, heads: usize, seq_len: usize) -> Option<Array3<f64>> {
        if self.rng.gen_bool(ATTENTION_PROBABILITY) {
            Some(row_stochastic_attention(&mut self.rng, heads, seq_len))
        } else {
            None
        }
    }
}

// ── Manual ──────────────────────────────────────────────

/// Scripted source useful for tests and deterministic playback.
pub struct ManualSource {
    steps: VecDeque<ClassificationStep>,
    attention: bool,
}

impl ManualSource {
    pub fn new(steps: impl IntoIterator<Item = ClassificationStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            attention: false,
        }
    }

    /// Emit a uniform attention tensor every tick.
    pub fn with_attention(mut self) -> Self {
        self.attention = true;
        self
    }
}

impl SignalSource for ManualSource {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn update_band_powers(&mut self, _bands: &mut BandPowers, _current: &ClassificationEvent) {}

    fn step_classification(&mut self, _current: &ClassificationEvent) -> ClassificationStep {
        self.steps
            .pop_front()
            .unwrap_or(ClassificationStep::Nudge(0.0))
    }

    fn class_activations(&mut self, class: MotorClass) -> [f64; 5] {
        let mut out = [2.5; 5];
        out[class.index()] = 8.5;
        out
    }

    fn attention(&mut self, heads: usize, seq_len: usize) -> Option<Array3<f64>> {
        self.attention.then(|| uniform_attention(heads, seq_len))
    }
}

// ── Spectral ────────────────────────────────────────────

const WINDOW_SAMPLES: usize = 256;

/// Synthesises class-dependent raw EEG and measures band power with an FFT.
///
/// Classification switching and attention come from an inner `SimulatedSource`; only the band
/// powers differ.
pub struct SpectralSource {
    inner: SimulatedSource,
    rng: StdRng,
    electrodes: Vec<String>,
    bands: Vec<FrequencyBand>,
    sample_rate_hz: f64,
    estimator: BandPowerEstimator,
    elapsed_samples: u64,
}

impl SpectralSource {
    pub fn new(config: &ClassifierConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: SimulatedSource::new(seed),
            rng,
            electrodes: config.electrodes.clone(),
            bands: config.bands.clone(),
            sample_rate_hz: config.sampling_rate,
            estimator: BandPowerEstimator::with_size(WINDOW_SAMPLES, config.sampling_rate),
            elapsed_samples: 0,
        }
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.electrodes.iter().position(|e| e == name)
    }

    /// One window of raw samples, `electrodes x WINDOW_SAMPLES`.
    pub fn synthesize(&mut self, current: &ClassificationEvent) -> Vec<Vec<f64>> {
        let n = WINDOW_SAMPLES;
        let fs = self.sample_rate_hz;
        let offset = self.elapsed_samples;
        let time = |i: usize| (offset + i as u64) as f64 / fs;
        let sine = |freq: f64, i: usize| (2.0 * PI * freq * time(i)).sin();

        let mut data: Vec<Vec<f64>> = (0..self.electrodes.len())
            .map(|_| {
                (0..n)
                    .map(|i| self.rng.gen_range(-0.87..0.87) + sine(10.0, i))
                    .collect()
            })
            .collect();

        // a montage without the expected site falls back to the first channel
        let mut boost = |idx: Option<usize>, suppress: f64, freq: f64, amp: f64| {
            if let Some(channel) = data.get_mut(idx.unwrap_or(0)) {
                for (i, v) in channel.iter_mut().enumerate() {
                    *v = *v * suppress + amp * sine(freq, i);
                }
            }
        };
        match current.class {
            MotorClass::LeftHand => boost(self.index_of("C4"), 0.5, 20.0, 1.5),
            MotorClass::RightHand => boost(self.index_of("C3"), 0.5, 20.0, 1.5),
            MotorClass::Feet => boost(self.index_of("Cz"), 1.0, 18.0, 2.0),
            MotorClass::Tongue => {
                for name in ["Fp1", "Fp2"] {
                    if let Some(idx) = self.index_of(name) {
                        boost(Some(idx), 1.0, 35.0, 0.8);
                    }
                }
            }
            MotorClass::Rest => {}
        }

        let noise = 1.0 - current.confidence;
        for channel in data.iter_mut() {
            for (i, v) in channel.iter_mut().enumerate() {
                let drift = 0.2 * i as f64 / (n - 1) as f64;
                *v += drift + noise * self.rng.gen_range(-1.0..1.0);
            }
        }
        self.elapsed_samples += n as u64;
        data
    }
}

/// Log-power mapped onto the dashboard's 0..100 scale.
fn display_scale(power: f64) -> f64 {
    ((10.0 * (power + 1e-9).log10() + 20.0) * 2.5).clamp(0.0, 100.0)
}

impl SignalSource for SpectralSource {
    fn name(&self) -> &'static str {
        "spectral"
    }

    fn update_band_powers(&mut self, bands: &mut BandPowers, current: &ClassificationEvent) {
        let raw = self.synthesize(current);
        let spectra: Vec<Vec<f64>> = raw
            .iter()
            .map(|channel| self.estimator.power_spectrum(channel))
            .collect();
        for band in &self.bands {
            let values = spectra
                .iter()
                .map(|s| display_scale(self.estimator.band_power(s, band)))
                .collect();
            bands.insert(band.name.clone(), values);
        }
    }

    fn step_classification(&mut self, current: &ClassificationEvent) -> ClassificationStep {
        self.inner.step_classification(current)
    }

    fn class_activations(&mut self, class: MotorClass) -> [f64; 5] {
        self.inner.class_activations(class)
    }

    fn attention(&mut self, heads: usize, seq_len: usize) -> Option<Array3<f64>> {
        self.inner.attention(heads, seq_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    #[test]
    fn attention_rows_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(11);
        for (heads, seq) in [(1, 1), (4, 8), (8, 16)] {
            let tensor = row_stochastic_attention(&mut rng, heads, seq);
            for head in tensor.axis_iter(Axis(0)) {
                for row in head.axis_iter(Axis(0)) {
                    assert!((row.sum() - 1.0).abs() < 1e-9);
                    assert!(row.iter().all(|w| *w > 0.0));
                }
            }
        }
    }

    #[test]
    fn simulated_steps_stay_in_range() {
        let mut source = SimulatedSource::new(Some(3));
        let current = ClassificationEvent::new(MotorClass::Rest, 0.7, 0);
        let mut bands = BandPowers::new();
        bands.insert("alpha".into(), vec![0.0, 50.0, 100.0]);
        for _ in 0..500 {
            source.update_band_powers(&mut bands, &current);
            assert!(bands["alpha"].iter().all(|v| (0.0..=100.0).contains(v)));
            match source.step_classification(&current) {
                ClassificationStep::Switch { confidence, .. } => {
                    assert!((0.5..=1.0).contains(&confidence))
                }
                ClassificationStep::Nudge(d) => assert!(d.abs() <= CONFIDENCE_STEP),
            }
            let act = source.class_activations(MotorClass::Feet);
            assert!((7.0..=10.0).contains(&act[MotorClass::Feet.index()]));
            assert!((0.0..=5.0).contains(&act[MotorClass::Rest.index()]));
        }
    }

    #[test]
    fn spectral_source_reflects_alpha_baseline() {
        let config = ClassifierConfig::default();
        let mut source = SpectralSource::new(&config, Some(5));
        let current = ClassificationEvent::new(MotorClass::Rest, 0.9, 0);
        let mut bands = BandPowers::new();
        source.update_band_powers(&mut bands, &current);
        assert_eq!(bands.len(), config.bands.len());
        let alpha = &bands["alpha"];
        let gamma = &bands["gamma"];
        assert_eq!(alpha.len(), config.electrodes.len());
        assert!(alpha.iter().zip(gamma).all(|(a, g)| a > g));
    }

    #[test]
    fn spectral_tongue_raises_frontal_gamma() {
        let config = ClassifierConfig::default();
        let mut source = SpectralSource::new(&config, Some(9));
        let mut bands = BandPowers::new();
        let tongue = ClassificationEvent::new(MotorClass::Tongue, 0.95, 0);
        source.update_band_powers(&mut bands, &tongue);
        let gamma = &bands["gamma"];
        let fp1 = gamma[0];
        let o2 = gamma[config.electrodes.len() - 1];
        assert!(fp1 > o2, "fp1={fp1} o2={o2}");
    }
}
