// src/classifier.rs
use std::collections::BTreeMap;

use ndarray::{Array3, Axis};
use serde::Serialize;

use crate::bus::{
    BusEvent, ConnectionRequest, ConnectionResponse, FeaturesExtracted, ResponseStatus,
};
use crate::config::ClassifierConfig;
use crate::drivers::source::{
    uniform_attention, ClassificationStep, SignalSource, SimulatedSource, SpectralSource,
};
use crate::types::{
    BandPowers, ClassificationEvent, ExtractedFeatures, FeatureBundle, FeatureMode, Millis,
    MotorClass, MovementParameters, SourceKind,
};

const DEFAULT_BAND_POWER: f64 = 50.0;
const MIN_CONFIDENCE: f64 = 0.5;
const MAX_CONFIDENCE: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ClassifierState {
    Idle,
    Active,
}

/// One column of the decoded-output chart.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DecodedPoint {
    pub time_ms: i64,
    pub activations: [f64; 5],
}

pub struct SignalClassifier {
    config: ClassifierConfig,
    source: Box<dyn SignalSource>,
    state: ClassifierState,
    band_powers: BandPowers,
    classification: ClassificationEvent,
    attention: Array3<f64>,
    decoded: Vec<DecodedPoint>,
    decoder_bridge: bool,
    feature_mode: FeatureMode,
    ticks: u64,
}

impl SignalClassifier {
    pub fn new(config: ClassifierConfig, source: Box<dyn SignalSource>) -> Self {
        let attention = uniform_attention(config.heads, config.seq_len);
        let mut classifier = Self {
            decoder_bridge: config.decoder_bridge,
            feature_mode: config.feature_mode,
            band_powers: BandPowers::new(),
            classification: ClassificationEvent::new(MotorClass::Rest, MIN_CONFIDENCE, 0),
            attention,
            decoded: Vec::new(),
            state: ClassifierState::Idle,
            ticks: 0,
            config,
            source,
        };
        classifier.reinitialize();
        classifier
    }

    /// Picks the signal source named in the configuration.
    pub fn from_config(config: ClassifierConfig, seed: Option<u64>) -> Self {
        let source: Box<dyn SignalSource> = match config.source {
            SourceKind::Simulated => Box::new(SimulatedSource::new(seed)),
            SourceKind::Spectral => Box::new(SpectralSource::new(&config, seed)),
        };
        log::info!("Signal classifier using {} source", source.name());
        Self::new(config, source)
    }

    fn reinitialize(&mut self) {
        self.band_powers = self
            .config
            .bands
            .iter()
            .map(|b| {
                (
                    b.name.clone(),
                    vec![DEFAULT_BAND_POWER; self.config.electrodes.len()],
                )
            })
            .collect();
        self.classification = ClassificationEvent::new(MotorClass::Rest, MIN_CONFIDENCE, 0);
        self.attention = uniform_attention(self.config.heads, self.config.seq_len);
        self.decoded.clear();
        self.ticks = 0;
    }

    pub fn state(&self) -> ClassifierState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ClassifierState::Active
    }

    pub fn tick_ms(&self) -> Millis {
        self.config.tick_ms
    }

    /// Idle -> Active. Returns `false` when already active.
    pub fn start(&mut self) -> bool {
        if self.is_active() {
            return false;
        }
        self.state = ClassifierState::Active;
        log::info!("Signal classifier started");
        true
    }

    /// Active -> Idle. Returns `false` when already idle.
    pub fn stop(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state = ClassifierState::Idle;
        log::info!("Signal classifier stopped");
        true
    }

    /// Stops if needed and restores defaults. Returns whether it was active.
    pub fn reset(&mut self) -> bool {
        let was_active = self.stop();
        self.reinitialize();
        was_active
    }

    pub fn set_decoder_bridge(&mut self, enabled: bool) {
        if self.decoder_bridge != enabled {
            log::info!("Decoder bridge {}", if enabled { "enabled" } else { "disabled" });
        }
        self.decoder_bridge = enabled;
    }

    pub fn decoder_bridge(&self) -> bool {
        self.decoder_bridge
    }

    pub fn set_feature_mode(&mut self, mode: FeatureMode) {
        self.feature_mode = mode;
    }

    pub fn feature_mode(&self) -> FeatureMode {
        self.feature_mode
    }

    pub fn classification(&self) -> ClassificationEvent {
        self.classification
    }

    pub fn band_powers(&self) -> &BandPowers {
        &self.band_powers
    }

    pub fn attention(&self) -> &Array3<f64> {
        &self.attention
    }

    pub fn decoded(&self) -> &[DecodedPoint] {
        &self.decoded
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// One timer step. Returns the events to publish, in order.
    pub fn tick(&mut self, now: Millis) -> Vec<BusEvent> {
        if !self.is_active() {
            return Vec::new();
        }
        self.ticks += 1;
        let mut events = Vec::new();

        // 1. band powers
        let current = self.classification;
        self.source.update_band_powers(&mut self.band_powers, &current);

        // 2. classification
        match self.source.step_classification(&current) {
            ClassificationStep::Switch { class, confidence } => {
                let confidence = confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
                self.classification = ClassificationEvent::new(class, confidence, now);
                log::debug!("classified {class} ({confidence:.2})");
                events.push(BusEvent::ClassificationUpdated(self.classification));
            }
            ClassificationStep::Nudge(delta) => {
                self.classification.confidence = (self.classification.confidence + delta)
                    .clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
            }
        }

        // 3. decoded-output history
        let step = self.config.tick_ms as i64;
        for point in self.decoded.iter_mut() {
            point.time_ms += step;
        }
        self.decoded.retain(|p| p.time_ms <= 0);
        let activations = self.source.class_activations(self.classification.class);
        self.decoded.push(DecodedPoint {
            time_ms: -step,
            activations,
        });

        // 4. attention
        if let Some(tensor) = self
            .source
            .attention(self.config.heads, self.config.seq_len)
        {
            self.attention = tensor;
        }

        // 5. decoder bridge
        if self.decoder_bridge {
            events.push(BusEvent::FeaturesExtracted(FeaturesExtracted {
                features: self.extract_features(),
                movement_parameters: self.movement_parameters(),
                timestamp: now,
            }));
        }
        events
    }

    /// Forces a label, as the backend's simulate endpoint does.
    pub fn set_simulated_class(
        &mut self,
        class: MotorClass,
        confidence: f64,
        now: Millis,
    ) -> BusEvent {
        self.classification = ClassificationEvent::new(class, confidence, now);
        BusEvent::ClassificationUpdated(self.classification)
    }

    pub fn movement_parameters(&self) -> MovementParameters {
        MovementParameters::from_classification(
            self.classification.class,
            self.classification.confidence,
        )
    }

    fn band_mean(&self, band: &str) -> f64 {
        self.band_powers
            .get(band)
            .filter(|v| !v.is_empty())
            .map(|v| v.iter().sum::<f64>() / v.len() as f64)
            .unwrap_or(0.0)
    }

    pub fn extract_features(&self) -> ExtractedFeatures {
        let classification = self.classification.class;
        let confidence = self.classification.confidence;
        match self.feature_mode {
            FeatureMode::Transformer => ExtractedFeatures::Transformer {
                attention: nested_attention(&self.attention),
                alpha_mean: self.band_mean("alpha"),
                beta_mean: self.band_mean("beta"),
                classification,
                confidence,
            },
            FeatureMode::Traditional => ExtractedFeatures::Traditional {
                band_means: self
                    .band_powers
                    .keys()
                    .map(|name| (name.clone(), self.band_mean(name)))
                    .collect::<BTreeMap<_, _>>(),
                classification,
                confidence,
            },
        }
    }

    /// Full frame for display.
    pub fn frame(&self) -> FeatureBundle {
        FeatureBundle {
            band_powers: self.band_powers.clone(),
            attention_matrix: nested_attention(&self.attention),
            classification: self.is_active().then_some(self.classification),
        }
    }

    pub fn supported_features(&self) -> Vec<String> {
        let mut features = vec!["classification".to_owned(), "band_powers".to_owned()];
        if self.feature_mode == FeatureMode::Transformer {
            features.push("attention".to_owned());
        }
        if self.decoder_bridge {
            features.push("movement".to_owned());
        }
        features
    }

    /// Answer to a language-bridge handshake.
    pub fn connection_response(&self, request: &ConnectionRequest) -> ConnectionResponse {
        let status = if !self.config.accept_clients {
            ResponseStatus::Rejected
        } else if self.is_active() {
            ResponseStatus::Connected
        } else {
            ResponseStatus::Standby
        };
        ConnectionResponse {
            status,
            features: self.supported_features(),
            client_id: request.client_id.clone(),
        }
    }
}

pub fn nested_attention(tensor: &Array3<f64>) -> Vec<Vec<Vec<f64>>> {
    tensor
        .axis_iter(Axis(0))
        .map(|head| {
            head.axis_iter(Axis(0))
                .map(|row| row.to_vec())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::source::ManualSource;

    fn manual(steps: Vec<ClassificationStep>) -> SignalClassifier {
        SignalClassifier::new(ClassifierConfig::default(), Box::new(ManualSource::new(steps)))
    }

    #[test]
    fn start_stop_reset_state_machine() {
        let mut c = manual(vec![]);
        assert_eq!(c.state(), ClassifierState::Idle);
        assert!(c.start());
        assert!(!c.start());
        c.tick(500);
        assert_eq!(c.ticks(), 1);
        assert!(c.reset());
        assert_eq!(c.state(), ClassifierState::Idle);
        assert_eq!(c.ticks(), 0);
        assert!(c.decoded().is_empty());
        assert!(!c.stop());
    }

    #[test]
    fn idle_classifier_does_nothing_on_tick() {
        let mut c = manual(vec![ClassificationStep::Switch {
            class: MotorClass::Feet,
            confidence: 0.9,
        }]);
        assert!(c.tick(500).is_empty());
        assert_eq!(c.classification().class, MotorClass::Rest);
    }

    #[test]
    fn switch_publishes_and_nudge_clamps() {
        let mut c = manual(vec![
            ClassificationStep::Switch {
                class: MotorClass::Tongue,
                confidence: 0.98,
            },
            ClassificationStep::Nudge(0.05),
            ClassificationStep::Nudge(-0.9),
        ]);
        c.start();
        let events = c.tick(500);
        assert_eq!(
            events,
            vec![BusEvent::ClassificationUpdated(ClassificationEvent::new(
                MotorClass::Tongue,
                0.98,
                500
            ))]
        );
        assert!(c.tick(1000).is_empty());
        assert_eq!(c.classification().confidence, 1.0);
        c.tick(1500);
        assert_eq!(c.classification().confidence, 0.5);
    }

    #[test]
    fn decoded_history_shifts_and_evicts() {
        let mut c = manual(vec![]);
        c.start();
        c.tick(500);
        assert_eq!(c.decoded().len(), 1);
        assert_eq!(c.decoded()[0].time_ms, -500);
        c.tick(1000);
        let times: Vec<i64> = c.decoded().iter().map(|p| p.time_ms).collect();
        assert_eq!(times, vec![0, -500]);
        c.tick(1500);
        let times: Vec<i64> = c.decoded().iter().map(|p| p.time_ms).collect();
        assert_eq!(times, vec![0, -500]);
        let latest = c.decoded().last().unwrap();
        assert_eq!(latest.activations[MotorClass::Rest.index()], 8.5);
    }

    #[test]
    fn bridge_publishes_features_with_movement() {
        let mut c = manual(vec![ClassificationStep::Switch {
            class: MotorClass::LeftHand,
            confidence: 0.8,
        }]);
        c.set_decoder_bridge(true);
        c.start();
        let events = c.tick(500);
        assert_eq!(events.len(), 2);
        let BusEvent::FeaturesExtracted(payload) = &events[1] else {
            panic!("expected features, got {:?}", events[1]);
        };
        assert_eq!(payload.timestamp, 500);
        assert_eq!(payload.movement_parameters.dx, -0.8);
        assert_eq!(payload.movement_parameters.dy, 0.0);
        assert!((payload.movement_parameters.velocity - 0.8).abs() < 1e-12);
        match &payload.features {
            ExtractedFeatures::Transformer {
                attention,
                alpha_mean,
                classification,
                ..
            } => {
                assert_eq!(attention.len(), 4);
                assert_eq!(attention[0].len(), 8);
                assert_eq!(*alpha_mean, DEFAULT_BAND_POWER);
                assert_eq!(*classification, MotorClass::LeftHand);
            }
            other => panic!("unexpected features {other:?}"),
        }
    }

    #[test]
    fn traditional_mode_reports_five_band_means() {
        let mut c = manual(vec![]);
        c.set_feature_mode(FeatureMode::Traditional);
        match c.extract_features() {
            ExtractedFeatures::Traditional { band_means, .. } => {
                assert_eq!(band_means.len(), 5);
                assert!(band_means.values().all(|v| *v == DEFAULT_BAND_POWER));
            }
            other => panic!("unexpected features {other:?}"),
        }
    }

    #[test]
    fn connection_response_tracks_state() {
        let mut c = manual(vec![]);
        let request = ConnectionRequest {
            timestamp: 0,
            client_id: "llm-1".into(),
        };
        assert_eq!(c.connection_response(&request).status, ResponseStatus::Standby);
        c.start();
        let response = c.connection_response(&request);
        assert_eq!(response.status, ResponseStatus::Connected);
        assert_eq!(response.client_id, "llm-1");

        let config = ClassifierConfig {
            accept_clients: false,
            ..ClassifierConfig::default()
        };
        let closed = SignalClassifier::new(config, Box::new(ManualSource::new(vec![])));
        assert_eq!(closed.connection_response(&request).status, ResponseStatus::Rejected);
    }

    #[test]
    fn simulated_source_keeps_attention_row_stochastic() {
        let mut c = SignalClassifier::from_config(ClassifierConfig::default(), Some(21));
        c.start();
        for i in 1..=40 {
            c.tick(i * 500);
            for head in nested_attention(c.attention()) {
                for row in head {
                    assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
                }
            }
            let conf = c.classification().confidence;
            assert!((0.5..=1.0).contains(&conf));
        }
    }
}
