// src/config.rs
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decoder::{trajectory::REACH_TARGETS, MAX_CAPACITY};
use crate::error::CoreError;
use crate::types::{DecoderModel, FeatureMode, Millis, SourceKind, TrajectoryType};

/// Standard 10-20 montage used by the classifier.
pub const DEFAULT_ELECTRODES: [&str; 19] = [
    "Fp1", "Fp2", "F7", "F3", "Fz", "F4", "F8", "T3", "C3", "Cz", "C4", "T4", "T5", "P3", "Pz",
    "P4", "T6", "O1", "O2",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub name: String,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl FrequencyBand {
    fn new(name: &str, low_hz: f64, high_hz: f64) -> Self {
        Self {
            name: name.to_owned(),
            low_hz,
            high_hz,
        }
    }
}

fn default_bands() -> Vec<FrequencyBand> {
    vec![
        FrequencyBand::new("delta", 0.5, 4.0),
        FrequencyBand::new("theta", 4.0, 8.0),
        FrequencyBand::new("alpha", 8.0, 13.0),
        FrequencyBand::new("beta", 13.0, 30.0),
        FrequencyBand::new("gamma", 30.0, 100.0),
    ]
}

fn montage(count: usize) -> Vec<String> {
    DEFAULT_ELECTRODES
        .iter()
        .take(count)
        .map(|s| (*s).to_owned())
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub tick_ms: Millis,
    pub electrodes: Vec<String>,
    pub bands: Vec<FrequencyBand>,
    pub heads: usize,
    pub seq_len: usize,
    pub feature_mode: FeatureMode,
    pub decoder_bridge: bool,
    pub source: SourceKind,
    pub sampling_rate: f64,
    pub accept_clients: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            tick_ms: 500,
            electrodes: montage(DEFAULT_ELECTRODES.len()),
            bands: default_bands(),
            heads: 4,
            seq_len: 8,
            feature_mode: FeatureMode::Transformer,
            decoder_bridge: false,
            source: SourceKind::Simulated,
            sampling_rate: 250.0,
            accept_clients: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub enabled: bool,
    pub trigger_threshold: f64,
    pub debounce_ms: Millis,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_threshold: 0.75,
            debounce_ms: 2000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub tick_ms: Millis,
    pub capacity: usize,
    pub model: DecoderModel,
    pub trajectory: TrajectoryType,
    pub noise: f64,
    pub use_external_features: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            capacity: 100,
            model: DecoderModel::Kalman,
            trajectory: TrajectoryType::Circular,
            noise: 0.05,
            use_external_features: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub tick_ms: Millis,
    pub impedance_step_ms: Millis,
    pub electrodes: Vec<String>,
    pub start_connected: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            impedance_step_ms: 100,
            electrodes: montage(8),
            start_connected: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub client_id: String,
    pub temperature: f64,
    pub top_p: f64,
    pub repetition_penalty: f64,
    pub guidance_strength: f64,
    pub history_limit: usize,
    pub semantic_mapping: BTreeMap<String, Vec<String>>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mapping = [
            ("left_hand", ["move", "change", "shift", "select"]),
            ("right_hand", ["create", "add", "increase", "new"]),
            ("feet", ["stop", "pause", "halt", "reduce"]),
            ("tongue", ["confirm", "accept", "approve", "yes"]),
            ("rest", ["neutral", "wait", "standby", "idle"]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.iter().map(|s| (*s).to_owned()).collect()))
        .collect();
        Self {
            client_id: "neuro-llama".to_owned(),
            temperature: 0.7,
            top_p: 0.9,
            repetition_penalty: 1.1,
            guidance_strength: 0.5,
            history_limit: 50,
            semantic_mapping: mapping,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WiringConfig {
    pub startup_delay_ms: Millis,
    pub movement_gate: f64,
    pub handshake_timeout_ms: Millis,
}

impl Default for WiringConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 1000,
            movement_gate: 0.65,
            handshake_timeout_ms: 2000,
        }
    }
}

/// Which modules get constructed; a disabled module behaves like an absent page section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleToggles {
    pub classifier: bool,
    pub actions: bool,
    pub decoder: bool,
    pub device: bool,
    pub language: bool,
}

impl Default for ModuleToggles {
    fn default() -> Self {
        Self {
            classifier: true,
            actions: true,
            decoder: true,
            device: true,
            language: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub classifier: ClassifierConfig,
    pub actions: ActionConfig,
    pub decoder: DecoderConfig,
    pub device: DeviceConfig,
    pub llm: LlmConfig,
    pub wiring: WiringConfig,
    pub modules: ModuleToggles,
    pub seed: Option<u64>,
}

impl DashboardConfig {
    /// Parses JSON; absent keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let config: DashboardConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let ticks = [
            ("classifier.tick_ms", self.classifier.tick_ms),
            ("decoder.tick_ms", self.decoder.tick_ms),
            ("device.tick_ms", self.device.tick_ms),
            ("device.impedance_step_ms", self.device.impedance_step_ms),
        ];
        for (name, value) in ticks {
            if value == 0 {
                return Err(CoreError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if self.classifier.electrodes.is_empty() || self.classifier.bands.is_empty() {
            return Err(CoreError::InvalidConfig(
                "classifier needs at least one electrode and one band".into(),
            ));
        }
        if self.classifier.heads == 0 || self.classifier.seq_len == 0 {
            return Err(CoreError::InvalidConfig(
                "attention heads and sequence length must be > 0".into(),
            ));
        }
        if !(REACH_TARGETS..=MAX_CAPACITY).contains(&self.decoder.capacity) {
            return Err(CoreError::InvalidConfig(format!(
                "decoder.capacity must be within {REACH_TARGETS}..={MAX_CAPACITY}"
            )));
        }
        let fractions = [
            ("actions.trigger_threshold", self.actions.trigger_threshold),
            ("wiring.movement_gate", self.wiring.movement_gate),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::InvalidConfig(format!("{name} must be within [0, 1]")));
            }
        }
        if self.classifier.sampling_rate <= 0.0 {
            return Err(CoreError::InvalidConfig(
                "sampling rate must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_nested_defaults() {
        let config = DashboardConfig::from_json(
            r#"{ "actions": { "trigger_threshold": 0.8 }, "decoder": { "trajectory": "reaching" } }"#,
        )
        .unwrap();
        assert_eq!(config.actions.trigger_threshold, 0.8);
        assert_eq!(config.actions.debounce_ms, 2000);
        assert_eq!(config.decoder.trajectory, TrajectoryType::Reaching);
        assert_eq!(config.decoder.capacity, 100);
        assert_eq!(config.classifier.electrodes.len(), 19);
        assert_eq!(config.llm.semantic_mapping["tongue"][0], "confirm");
    }

    #[test]
    fn zero_tick_is_rejected() {
        let err = DashboardConfig::from_json(r#"{ "device": { "tick_ms": 0 } }"#).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn oversized_buffer_and_out_of_range_fractions_are_rejected() {
        let err = DashboardConfig::from_json(r#"{ "decoder": { "capacity": 500 } }"#);
        assert!(matches!(err, Err(CoreError::InvalidConfig(_))));
        assert!(DashboardConfig::from_json(r#"{ "decoder": { "capacity": 100 } }"#).is_ok());
        let err = DashboardConfig::from_json(r#"{ "actions": { "trigger_threshold": 1.5 } }"#);
        assert!(matches!(err, Err(CoreError::InvalidConfig(_))));
        let err = DashboardConfig::from_json(r#"{ "wiring": { "movement_gate": -0.1 } }"#);
        assert!(matches!(err, Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = std::env::temp_dir().join(format!("neurobridge-config-{}", std::process::id()));
        let path = dir.join("dashboard.json");
        let mut config = DashboardConfig::default();
        config.seed = Some(7);
        config.wiring.movement_gate = 0.7;
        config.save(&path).unwrap();
        let loaded = DashboardConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        std::fs::remove_dir_all(dir).ok();
    }
}
