// src/llm_bridge.rs
//! Bridge between the classifier and the (simulated) language model.
//!
//! The latest classification biases generation: confident readings cool the sampling
//! temperature, raise the repetition penalty and prefix the prompt with the class's concepts.

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::actions::ActionTrigger;
use crate::bus::{
    Activation, BusEvent, ConnectionRequest, ConnectionResponse, LlamaReady, ResponseStatus,
};
use crate::config::LlmConfig;
use crate::error::CoreError;
use crate::types::{ActionName, ClassificationEvent, Millis, MotorClass};

const MIN_TEMPERATURE: f64 = 0.1;
const MIN_REPETITION_PENALTY: f64 = 1.0;
const TEMPERATURE_SHIFT: f64 = 0.2;
const PENALTY_SHIFT: f64 = 0.1;
const RECENT_ACTIONS: usize = 10;

const GENERIC_RESPONSES: [&str; 4] = [
    "This is a simulated response from the LLaMA model.",
    "The neural processor is influencing this response.",
    "Without a loaded model, only simulated text is available.",
    "In a full deployment, this would be generated by the language model.",
];

fn class_response(class: MotorClass) -> &'static str {
    match class {
        MotorClass::LeftHand => "Moving focus to different aspects.",
        MotorClass::RightHand => "Creating new concepts and ideas.",
        MotorClass::Feet => "Stopping current process and reconsidering.",
        MotorClass::Tongue => "Confirming and accepting the current direction.",
        MotorClass::Rest => "Maintaining neutral stance and observing.",
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Disconnected,
    Pending { client_id: String, deadline: Millis },
    Connected,
    Standby,
    Rejected,
    TimedOut,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Pending { .. } => "pending",
            Self::Connected => "connected",
            Self::Standby => "standby",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed out",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    pub temperature: f64,
    pub top_p: f64,
    pub repetition_penalty: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub text: String,
    pub full_text: String,
    pub neural_class: Option<MotorClass>,
    pub neural_confidence: f64,
    pub parameters: GenerationParameters,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub prompt: String,
    pub generated: String,
    pub neural_class: Option<MotorClass>,
    pub neural_confidence: f64,
    pub timestamp: Millis,
}

pub struct LlmBridge {
    config: LlmConfig,
    rng: StdRng,
    active: bool,
    connection: ConnectionStatus,
    guidance: Option<ClassificationEvent>,
    recent_actions: VecDeque<String>,
    history: VecDeque<HistoryEntry>,
}

impl LlmBridge {
    pub fn new(config: LlmConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng,
            active: false,
            connection: ConnectionStatus::Disconnected,
            guidance: None,
            recent_actions: VecDeque::with_capacity(RECENT_ACTIONS),
            history: VecDeque::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn connection(&self) -> &ConnectionStatus {
        &self.connection
    }

    pub fn guidance(&self) -> Option<ClassificationEvent> {
        self.guidance
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn recent_actions(&self) -> impl Iterator<Item = &str> {
        self.recent_actions.iter().map(String::as_str)
    }

    pub fn ready_event(&self) -> BusEvent {
        BusEvent::LlamaReady(LlamaReady {
            concept_mapping: self.config.semantic_mapping.clone(),
            action_verbs: ActionName::ALL.iter().map(|a| a.as_str().to_owned()).collect(),
        })
    }

    pub fn set_active(&mut self, active: bool, now: Millis) -> BusEvent {
        self.active = active;
        log::info!("Language bridge {}", if active { "activated" } else { "deactivated" });
        BusEvent::LlamaActivation(Activation {
            active,
            timestamp: now,
        })
    }

    /// Opens a handshake. `None` while one is already pending.
    pub fn begin_handshake(&mut self, now: Millis, timeout_ms: Millis) -> Option<BusEvent> {
        if matches!(self.connection, ConnectionStatus::Pending { .. }) {
            return None;
        }
        let client_id = self.config.client_id.clone();
        self.connection = ConnectionStatus::Pending {
            client_id: client_id.clone(),
            deadline: now + timeout_ms,
        };
        Some(BusEvent::ConnectionRequest(ConnectionRequest {
            timestamp: now,
            client_id,
        }))
    }

    /// Settles a pending handshake. Responses for other clients are ignored.
    pub fn on_connection_response(&mut self, response: &ConnectionResponse) -> bool {
        let ConnectionStatus::Pending { client_id, .. } = &self.connection else {
            return false;
        };
        if *client_id != response.client_id {
            return false;
        }
        self.connection = match response.status {
            ResponseStatus::Connected => ConnectionStatus::Connected,
            ResponseStatus::Standby => ConnectionStatus::Standby,
            ResponseStatus::Rejected => ConnectionStatus::Rejected,
        };
        log::info!("Language bridge handshake: {}", self.connection.label());
        true
    }

    /// A pending handshake past its deadline resolves to `TimedOut`.
    pub fn on_handshake_timeout(&mut self, now: Millis) -> bool {
        match self.connection {
            ConnectionStatus::Pending { deadline, .. } if now >= deadline => {
                self.connection = ConnectionStatus::TimedOut;
                log::info!("Language bridge handshake timed out");
                true
            }
            _ => false,
        }
    }

    pub fn apply_guidance(&mut self, event: &ClassificationEvent) {
        self.guidance = Some(*event);
        log::debug!(
            "neural guidance set: class={}, confidence={:.2}",
            event.class,
            event.confidence
        );
    }

    pub fn record_action(&mut self, trigger: &ActionTrigger) {
        if self.recent_actions.len() == RECENT_ACTIONS {
            self.recent_actions.pop_front();
        }
        self.recent_actions.push_back(trigger.describe());
    }

    fn concepts(&self) -> Option<&Vec<String>> {
        let class = self.guidance?.class;
        self.config.semantic_mapping.get(class.key())
    }

    /// Sampling parameters after guidance.
    pub fn guidance_parameters(&self) -> GenerationParameters {
        let shift = match (self.guidance, self.concepts()) {
            (Some(g), Some(_)) => g.confidence * self.config.guidance_strength,
            _ => 0.0,
        };
        GenerationParameters {
            temperature: (self.config.temperature - TEMPERATURE_SHIFT * shift).max(MIN_TEMPERATURE),
            top_p: self.config.top_p,
            repetition_penalty: (self.config.repetition_penalty + PENALTY_SHIFT * shift)
                .max(MIN_REPETITION_PENALTY),
        }
    }

    pub fn compose_prompt(&self, prompt: &str) -> String {
        let mut lines = Vec::new();
        if let Some(concepts) = self.concepts() {
            lines.push(format!("[Focusing on concepts: {}]", concepts.join(", ")));
        }
        if !self.recent_actions.is_empty() {
            let actions: Vec<&str> = self.recent_actions().collect();
            lines.push(format!("[Recent actions: {}]", actions.join(", ")));
        }
        lines.push(prompt.to_owned());
        lines.join("\n")
    }

    /// Simulated completion. Fails while the bridge is inactive.
    pub fn generate(&mut self, prompt: &str, now: Millis) -> Result<Generation, CoreError> {
        if !self.active {
            return Err(CoreError::Unavailable("language bridge"));
        }
        let full_prompt = self.compose_prompt(prompt);
        let parameters = self.guidance_parameters();
        let mut options: Vec<&str> = GENERIC_RESPONSES.to_vec();
        if let Some(g) = self.guidance {
            options.push(class_response(g.class));
        }
        let text = options
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(GENERIC_RESPONSES[0])
            .to_owned();

        let neural_class = self.guidance.map(|g| g.class);
        let neural_confidence = self.guidance.map(|g| g.confidence).unwrap_or(0.0);
        self.history.push_back(HistoryEntry {
            prompt: full_prompt.clone(),
            generated: text.clone(),
            neural_class,
            neural_confidence,
            timestamp: now,
        });
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
        Ok(Generation {
            full_text: format!("{full_prompt}\n{text}"),
            text,
            neural_class,
            neural_confidence,
            parameters,
        })
    }

    /// Concept mapping, for display.
    pub fn semantic_mapping(&self) -> &BTreeMap<String, Vec<String>> {
        &self.config.semantic_mapping
    }
}
