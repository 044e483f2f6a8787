// src/decoder/metrics.rs
use rand::Rng;
use serde::Serialize;

use crate::types::{DecoderModel, TrajectoryType};

const JITTER: f64 = 0.03;

/// Decoder quality figures shown next to the trajectory chart.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderMetrics {
    pub accuracy: f64,
    pub mse: f64,
    pub r2: f64,
    pub correlation: f64,
    pub decode_time_ms: f64,
    pub bitrate: f64,
}

impl DecoderMetrics {
    pub const BASELINE: DecoderMetrics = DecoderMetrics {
        accuracy: 0.85,
        mse: 0.12,
        r2: 0.78,
        correlation: 0.88,
        decode_time_ms: 12.0,
        bitrate: 25.0,
    };

    fn scaled(&self, f: &Factors) -> Self {
        Self {
            accuracy: self.accuracy * f.0[0],
            mse: self.mse * f.0[1],
            r2: self.r2 * f.0[2],
            correlation: self.correlation * f.0[3],
            decode_time_ms: self.decode_time_ms * f.0[4],
            bitrate: self.bitrate * f.0[5],
        }
    }

    /// Pulls every figure back into its valid range.
    pub fn clamped(self) -> Self {
        Self {
            accuracy: self.accuracy.clamp(0.5, 0.98),
            mse: self.mse.max(0.01),
            r2: self.r2.clamp(0.4, 0.98),
            correlation: self.correlation.clamp(0.5, 0.99),
            decode_time_ms: self.decode_time_ms.max(1.0),
            bitrate: self.bitrate.max(0.0),
        }
    }

    /// Baseline adjusted for the model and trajectory, with a little jitter, then clamped.
    pub fn compute<R: Rng>(model: DecoderModel, trajectory: TrajectoryType, rng: &mut R) -> Self {
        let jitter = Factors([(); 6].map(|_| 1.0 + rng.gen_range(-JITTER..=JITTER)));
        Self::BASELINE
            .scaled(&model_factors(model))
            .scaled(&trajectory_factors(trajectory))
            .scaled(&jitter)
            .clamped()
    }
}

/// Multipliers in field order: accuracy, mse, r2, correlation, decode time, bitrate.
struct Factors([f64; 6]);

fn model_factors(model: DecoderModel) -> Factors {
    match model {
        DecoderModel::Kalman => Factors([0.92, 1.35, 0.9, 0.93, 0.5, 0.8]),
        DecoderModel::Lstm => Factors([1.05, 0.8, 1.06, 1.04, 1.6, 1.15]),
        DecoderModel::Transformer => Factors([1.12, 0.6, 1.12, 1.08, 2.4, 1.3]),
    }
}

fn trajectory_factors(trajectory: TrajectoryType) -> Factors {
    match trajectory {
        TrajectoryType::Circular => Factors([1.04, 0.85, 1.05, 1.03, 1.0, 1.0]),
        TrajectoryType::Figure8 => Factors([0.96, 1.2, 0.94, 0.96, 1.05, 0.95]),
        TrajectoryType::Reaching => Factors([1.0, 1.0, 1.0, 1.0, 1.1, 1.1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn every_pair_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(8);
        for model in DecoderModel::ALL {
            for trajectory in TrajectoryType::ALL {
                for _ in 0..50 {
                    let m = DecoderMetrics::compute(model, trajectory, &mut rng);
                    assert!((0.5..=0.98).contains(&m.accuracy), "{model:?}/{trajectory:?}");
                    assert!(m.mse >= 0.01);
                    assert!((0.4..=0.98).contains(&m.r2));
                    assert!((0.5..=0.99).contains(&m.correlation));
                }
            }
        }
    }

    #[test]
    fn transformer_beats_kalman_on_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let kalman = DecoderMetrics::compute(DecoderModel::Kalman, TrajectoryType::Reaching, &mut rng);
        let transformer =
            DecoderMetrics::compute(DecoderModel::Transformer, TrajectoryType::Reaching, &mut rng);
        assert!(transformer.mse < kalman.mse);
        assert!(transformer.decode_time_ms > kalman.decode_time_ms);
    }

    #[test]
    fn clamping_pulls_extremes_back() {
        let wild = DecoderMetrics {
            accuracy: 1.4,
            mse: -1.0,
            r2: 0.1,
            correlation: 2.0,
            decode_time_ms: 0.0,
            bitrate: -3.0,
        }
        .clamped();
        assert_eq!(wild.accuracy, 0.98);
        assert_eq!(wild.mse, 0.01);
        assert_eq!(wild.r2, 0.4);
        assert_eq!(wild.correlation, 0.99);
    }
}
