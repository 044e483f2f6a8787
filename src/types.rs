// src/types.rs
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::DashboardSnapshot;
use crate::error::CoreError;

/// Monotonic milliseconds since the runtime started.
pub type Millis = u64;

// Motor imagery classes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MotorClass {
    #[serde(rename = "Left Hand")]
    LeftHand,
    #[serde(rename = "Right Hand")]
    RightHand,
    #[serde(rename = "Feet")]
    Feet,
    #[serde(rename = "Tongue")]
    Tongue,
    #[serde(rename = "Rest")]
    Rest,
}

impl MotorClass {
    pub const ALL: [MotorClass; 5] = [
        MotorClass::LeftHand,
        MotorClass::RightHand,
        MotorClass::Feet,
        MotorClass::Tongue,
        MotorClass::Rest,
    ];

    /// Display label, also the wire form.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LeftHand => "Left Hand",
            Self::RightHand => "Right Hand",
            Self::Feet => "Feet",
            Self::Tongue => "Tongue",
            Self::Rest => "Rest",
        }
    }

    /// Snake-case key used by the semantic concept mapping.
    pub fn key(&self) -> &'static str {
        match self {
            Self::LeftHand => "left_hand",
            Self::RightHand => "right_hand",
            Self::Feet => "feet",
            Self::Tongue => "tongue",
            Self::Rest => "rest",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::LeftHand => 0,
            Self::RightHand => 1,
            Self::Feet => 2,
            Self::Tongue => 3,
            Self::Rest => 4,
        }
    }
}

impl fmt::Display for MotorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MotorClass {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MotorClass::ALL
            .iter()
            .copied()
            .find(|c| c.label().eq_ignore_ascii_case(s) || c.key() == s)
            .ok_or_else(|| CoreError::UnknownLabel(s.to_owned()))
    }
}

/// Classification published by the signal classifier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEvent {
    pub class: MotorClass,
    pub confidence: f64,
    pub timestamp: Millis,
}

impl ClassificationEvent {
    pub fn new(class: MotorClass, confidence: f64, timestamp: Millis) -> Self {
        Self {
            class,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp,
        }
    }
}

// Action accumulators
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionName {
    Navigate,
    Select,
    Modify,
    Create,
    Delete,
}

impl ActionName {
    pub const ALL: [ActionName; 5] = [
        ActionName::Navigate,
        ActionName::Select,
        ActionName::Modify,
        ActionName::Create,
        ActionName::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Select => "select",
            Self::Modify => "modify",
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionDirection {
    Forward,
    Backward,
    Increase,
    Decrease,
}

impl ActionDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Increase => "increase",
            Self::Decrease => "decrease",
        }
    }
}

/// Direction carried by `decoder:movement-request`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Left,
    Right,
    Up,
    Down,
}

impl MoveDirection {
    /// Unit vector in decoder space.
    pub fn vector(&self) -> (f64, f64) {
        match self {
            Self::Left => (-1.0, 0.0),
            Self::Right => (1.0, 0.0),
            Self::Up => (0.0, 1.0),
            Self::Down => (0.0, -1.0),
        }
    }

    /// Classification to direction lookup; `Rest` has no direction.
    pub fn from_class(class: MotorClass) -> Option<Self> {
        match class {
            MotorClass::LeftHand => Some(Self::Left),
            MotorClass::RightHand => Some(Self::Right),
            MotorClass::Feet => Some(Self::Down),
            MotorClass::Tongue => Some(Self::Up),
            MotorClass::Rest => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureMode {
    Transformer,
    Traditional,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Simulated,
    Spectral,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryType {
    Circular,
    #[serde(rename = "figure8")]
    Figure8,
    Reaching,
}

impl TrajectoryType {
    pub const ALL: [TrajectoryType; 3] = [
        TrajectoryType::Circular,
        TrajectoryType::Figure8,
        TrajectoryType::Reaching,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Circular => "circular",
            Self::Figure8 => "figure8",
            Self::Reaching => "reaching",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderModel {
    Kalman,
    Lstm,
    Transformer,
}

impl DecoderModel {
    pub const ALL: [DecoderModel; 3] = [
        DecoderModel::Kalman,
        DecoderModel::Lstm,
        DecoderModel::Transformer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kalman => "kalman",
            Self::Lstm => "lstm",
            Self::Transformer => "transformer",
        }
    }
}

/// Band name -> one value per electrode.
pub type BandPowers = BTreeMap<String, Vec<f64>>;

/// Movement parameters derived from a classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementParameters {
    pub dx: f64,
    pub dy: f64,
    pub velocity: f64,
}

impl MovementParameters {
    /// Unit vector per class scaled by confidence; `Rest` stays at the origin.
    pub fn from_classification(class: MotorClass, confidence: f64) -> Self {
        let (ux, uy) = MoveDirection::from_class(class)
            .map(|d| d.vector())
            .unwrap_or((0.0, 0.0));
        let dx = ux * confidence;
        let dy = uy * confidence;
        Self {
            dx,
            dy,
            velocity: (dx * dx + dy * dy).sqrt(),
        }
    }
}

/// Features handed to the movement decoder when the decoder bridge is on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExtractedFeatures {
    #[serde(rename_all = "camelCase")]
    Transformer {
        attention: Vec<Vec<Vec<f64>>>,
        alpha_mean: f64,
        beta_mean: f64,
        classification: MotorClass,
        confidence: f64,
    },
    #[serde(rename_all = "camelCase")]
    Traditional {
        band_means: BTreeMap<String, f64>,
        classification: MotorClass,
        confidence: f64,
    },
}

/// One full classifier frame, regenerated every tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureBundle {
    pub band_powers: BandPowers,
    pub attention_matrix: Vec<Vec<Vec<f64>>>,
    pub classification: Option<ClassificationEvent>,
}

// GUI -> engine
#[derive(Clone, Debug)]
pub enum GuiCommand {
    StartClassifier,
    StopClassifier,
    ResetClassifier,
    ForceClass(MotorClass, f64),
    SetDecoderBridge(bool),
    SetFeatureMode(FeatureMode),
    SetActionsEnabled(bool),
    SetTriggerThreshold(f64),
    SetDecoderModel(DecoderModel),
    SetTrajectoryType(TrajectoryType),
    ToggleDevice,
    RunImpedanceCheck,
    ConnectLanguageBridge,
    SetLanguageBridgeActive(bool),
    Generate(String),
    Rewire,
    ExportTrajectory(PathBuf),
    ExportAttention(PathBuf),
    Shutdown,
}

// engine -> GUI
#[derive(Clone, Debug)]
pub enum EngineMessage {
    Log(String),
    Snapshot(Box<DashboardSnapshot>),
}
