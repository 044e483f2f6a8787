// src/decoder/mod.rs
pub mod buffer;
pub mod metrics;
pub mod trajectory;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub use buffer::{TrajectoryBuffer, TrajectoryPoint, Vec2, MAX_CAPACITY};
pub use metrics::DecoderMetrics;
pub use trajectory::{Sample, TrajectoryGenerator};

use crate::bus::{BusEvent, DecoderCapabilities, FeaturesExtracted, MovementRequest};
use crate::config::DecoderConfig;
use crate::types::{
    DecoderModel, ExtractedFeatures, Millis, MotorClass, MovementParameters, TrajectoryType,
};

const DRIVE_GAIN: f64 = 0.15;
const DRIVE_DECAY: f64 = 0.5;

/// Simulated movement decoder: a trajectory generator feeding a bounded history, nudged by
/// movement requests and (optionally) by classifier features.
pub struct MovementDecoder {
    config: DecoderConfig,
    rng: StdRng,
    model: DecoderModel,
    generator: TrajectoryGenerator,
    buffer: TrajectoryBuffer,
    metrics: DecoderMetrics,
    drive: Vec2,
    last_features: Option<(MotorClass, MovementParameters)>,
    requests: u64,
}

impl MovementDecoder {
    pub fn new(config: DecoderConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut decoder = Self {
            rng,
            model: config.model,
            generator: TrajectoryGenerator::new(config.trajectory),
            buffer: TrajectoryBuffer::with_capacity(config.capacity),
            metrics: DecoderMetrics::BASELINE,
            drive: (0.0, 0.0),
            last_features: None,
            requests: 0,
            config,
        };
        decoder.regenerate(0);
        decoder
    }

    pub fn tick_ms(&self) -> Millis {
        self.config.tick_ms
    }

    pub fn model(&self) -> DecoderModel {
        self.model
    }

    pub fn trajectory_type(&self) -> TrajectoryType {
        self.generator.kind()
    }

    pub fn metrics(&self) -> DecoderMetrics {
        self.metrics
    }

    pub fn buffer(&self) -> &TrajectoryBuffer {
        &self.buffer
    }

    pub fn movement_requests(&self) -> u64 {
        self.requests
    }

    pub fn last_features(&self) -> Option<(MotorClass, MovementParameters)> {
        self.last_features
    }

    pub fn ready_event(&self) -> BusEvent {
        BusEvent::DecoderReady(DecoderCapabilities {
            supported_features: vec![
                "movement_parameters".to_owned(),
                "classification".to_owned(),
                "attention".to_owned(),
                "band_powers".to_owned(),
            ],
            trajectory_types: TrajectoryType::ALL
                .iter()
                .map(|t| t.as_str().to_owned())
                .collect(),
            decoder_types: DecoderModel::ALL
                .iter()
                .map(|m| m.as_str().to_owned())
                .collect(),
        })
    }

    pub fn set_model(&mut self, model: DecoderModel, now: Millis) {
        self.model = model;
        log::info!("Decoder model set to {}", model.as_str());
        self.regenerate(now);
    }

    pub fn set_trajectory_type(&mut self, kind: TrajectoryType, now: Millis) {
        self.generator = TrajectoryGenerator::new(kind);
        log::info!("Trajectory type set to {}", kind.as_str());
        self.regenerate(now);
    }

    /// Prediction noise amplitude; reaching is noisier early in each movement.
    fn noise_amplitude(&self, progress: Option<f64>) -> f64 {
        let model_scale = match self.model {
            DecoderModel::Kalman => 1.0,
            DecoderModel::Lstm => 0.8,
            DecoderModel::Transformer => 0.6,
        };
        let base = match progress {
            Some(p) => self.config.noise * (1.5 - p),
            None => self.config.noise,
        };
        base * model_scale
    }

    fn predict(&mut self, actual: Vec2, progress: Option<f64>) -> Vec2 {
        let amp = self.noise_amplitude(progress);
        if amp <= 0.0 {
            return actual;
        }
        (
            actual.0 + self.rng.gen_range(-amp..=amp),
            actual.1 + self.rng.gen_range(-amp..=amp),
        )
    }

    /// Rebuilds the whole buffer under the current generator and recomputes metrics.
    fn regenerate(&mut self, now: Millis) {
        let samples = self.generator.regenerate(self.buffer.capacity());
        let tick = self.config.tick_ms as i64;
        // newest point lands on `now`
        let start = now as i64 - tick * samples.len().saturating_sub(1) as i64;
        let mut previous: Option<TrajectoryPoint> = None;
        let mut points = Vec::with_capacity(samples.len());
        for (i, sample) in samples.into_iter().enumerate() {
            let predicted = self.predict(sample.position, sample.progress);
            let point = build_point(
                sample,
                predicted,
                start + i as i64 * tick,
                previous.as_ref(),
            );
            previous = Some(point);
            points.push(point);
        }
        self.buffer.replace(points);
        self.metrics = DecoderMetrics::compute(self.model, self.generator.kind(), &mut self.rng);
        log::debug!(
            "decoder regenerated {} points, accuracy {:.3}",
            self.buffer.len(),
            self.metrics.accuracy
        );
    }

    /// One timer step: advance the generator, apply pending drive, push the new point.
    pub fn tick(&mut self, now: Millis) -> TrajectoryPoint {
        let mut sample = self.generator.step();
        sample.position = trajectory::clamp_position((
            sample.position.0 + self.drive.0,
            sample.position.1 + self.drive.1,
        ));
        self.drive = (self.drive.0 * DRIVE_DECAY, self.drive.1 * DRIVE_DECAY);
        let predicted = trajectory::clamp_position(self.predict(sample.position, sample.progress));
        let point = build_point(sample, predicted, now as i64, self.buffer.latest());
        self.buffer.push(point);
        point
    }

    pub fn handle_movement_request(&mut self, request: &MovementRequest) {
        let (ux, uy) = request.direction.vector();
        let gain = DRIVE_GAIN * request.confidence.clamp(0.0, 1.0);
        self.drive.0 += ux * gain;
        self.drive.1 += uy * gain;
        self.requests += 1;
        log::debug!(
            "movement request {:?} ({:.2}) from {}",
            request.direction,
            request.confidence,
            request.source
        );
    }

    /// Features always update the readout; they steer the cursor only when enabled.
    pub fn handle_features(&mut self, payload: &FeaturesExtracted) {
        let class = match &payload.features {
            ExtractedFeatures::Transformer { classification, .. }
            | ExtractedFeatures::Traditional { classification, .. } => *classification,
        };
        let params = payload.movement_parameters;
        self.last_features = Some((class, params));
        if self.config.use_external_features {
            self.drive.0 += params.dx * DRIVE_GAIN;
            self.drive.1 += params.dy * DRIVE_GAIN;
        }
    }

    pub fn set_use_external_features(&mut self, enabled: bool) {
        self.config.use_external_features = enabled;
    }
}

fn velocity(from: Vec2, to: Vec2, dt_ms: i64) -> Vec2 {
    if dt_ms <= 0 {
        return (0.0, 0.0);
    }
    let dt = dt_ms as f64 / 1000.0;
    ((to.0 - from.0) / dt, (to.1 - from.1) / dt)
}

fn build_point(
    sample: Sample,
    predicted: Vec2,
    timestamp_ms: i64,
    previous: Option<&TrajectoryPoint>,
) -> TrajectoryPoint {
    let (velocity_actual, velocity_predicted) = match previous {
        Some(prev) => {
            let dt = timestamp_ms - prev.timestamp_ms;
            (
                velocity(prev.actual, sample.position, dt),
                velocity(prev.predicted, predicted, dt),
            )
        }
        None => ((0.0, 0.0), (0.0, 0.0)),
    };
    TrajectoryPoint {
        actual: sample.position,
        predicted,
        velocity_actual,
        velocity_predicted,
        timestamp_ms,
        target: sample.target,
    }
}
