// src/actions.rs
//! Action accumulators driven by classification events.
//!
//! Every event decays all accumulators by 0.9 before the routed class raises its target(s), and
//! `Rest` applies a further 0.8 decay. Triggers are debounced per accumulator, not queued.

use std::collections::VecDeque;

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use crate::config::ActionConfig;
use crate::types::{ActionDirection, ActionName, ClassificationEvent, Millis, MotorClass};

const DECAY: f64 = 0.9;
const REST_DECAY: f64 = 0.8;
const TONGUE_MODIFY_SCALE: f64 = 0.8;
const ACTIVE_ABOVE: f64 = 0.6;
const TRIGGER_LOG_LIMIT: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActionAccumulator {
    pub name: ActionName,
    pub confidence: f64,
    pub direction: Option<ActionDirection>,
    pub triggered: bool,
    pub last_triggered: Option<Millis>,
}

impl ActionAccumulator {
    fn new(name: ActionName) -> Self {
        Self {
            name,
            confidence: 0.0,
            direction: None,
            triggered: false,
            last_triggered: None,
        }
    }

    /// Always derived from `confidence`.
    pub fn active(&self) -> bool {
        self.confidence > ACTIVE_ABOVE
    }

    fn raise(&mut self, signal: f64) {
        self.confidence = self.confidence.max(signal).clamp(0.0, 1.0);
    }

    fn clear(&mut self) {
        self.confidence = 0.0;
        self.triggered = false;
    }
}

// `active` is written out but never stored.
impl Serialize for ActionAccumulator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ActionAccumulator", 6)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("confidence", &self.confidence)?;
        state.serialize_field("direction", &self.direction)?;
        state.serialize_field("active", &self.active())?;
        state.serialize_field("triggered", &self.triggered)?;
        state.serialize_field("last_triggered", &self.last_triggered)?;
        state.end()
    }
}

/// A fired action; the side effect the dashboard performs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ActionTrigger {
    pub action: ActionName,
    pub direction: Option<ActionDirection>,
    pub confidence: f64,
    pub at: Millis,
}

impl ActionTrigger {
    /// Short human label, e.g. `navigate (forward)`.
    pub fn describe(&self) -> String {
        match self.direction {
            Some(direction) => format!("{} ({})", self.action.as_str(), direction.as_str()),
            None => self.action.as_str().to_owned(),
        }
    }
}

pub struct ActionEngine {
    accumulators: [ActionAccumulator; 5],
    enabled: bool,
    threshold: f64,
    debounce_ms: Millis,
    log: VecDeque<ActionTrigger>,
}

impl ActionEngine {
    pub fn new(config: &ActionConfig) -> Self {
        Self {
            accumulators: ActionName::ALL.map(ActionAccumulator::new),
            enabled: config.enabled,
            threshold: config.trigger_threshold,
            debounce_ms: config.debounce_ms,
            log: VecDeque::with_capacity(TRIGGER_LOG_LIMIT),
        }
    }

    pub fn accumulators(&self) -> &[ActionAccumulator; 5] {
        &self.accumulators
    }

    pub fn get(&self, name: ActionName) -> &ActionAccumulator {
        &self.accumulators[Self::slot(name)]
    }

    fn get_mut(&mut self, name: ActionName) -> &mut ActionAccumulator {
        &mut self.accumulators[Self::slot(name)]
    }

    fn slot(name: ActionName) -> usize {
        ActionName::ALL
            .iter()
            .position(|n| *n == name)
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling clears every accumulator immediately.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            for acc in self.accumulators.iter_mut() {
                acc.clear();
            }
        }
        log::info!("Action engine {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    /// Most recent triggers, oldest first.
    pub fn recent_triggers(&self) -> impl Iterator<Item = &ActionTrigger> {
        self.log.iter()
    }

    /// Processes one classification. Returns the trigger if one fired.
    pub fn handle(&mut self, event: &ClassificationEvent, now: Millis) -> Option<ActionTrigger> {
        if !self.enabled {
            return None;
        }
        for acc in self.accumulators.iter_mut() {
            acc.triggered = false;
            acc.confidence *= DECAY;
        }

        let c = event.confidence;
        match event.class {
            MotorClass::LeftHand => {
                let nav = self.get_mut(ActionName::Navigate);
                nav.raise(c);
                nav.direction = Some(ActionDirection::Backward);
            }
            MotorClass::RightHand => {
                let nav = self.get_mut(ActionName::Navigate);
                nav.raise(c);
                nav.direction = Some(ActionDirection::Forward);
            }
            MotorClass::Feet => {
                let modify = self.get_mut(ActionName::Modify);
                modify.raise(c);
                modify.direction = Some(ActionDirection::Decrease);
            }
            MotorClass::Tongue => {
                self.get_mut(ActionName::Select).raise(c);
                let modify = self.get_mut(ActionName::Modify);
                modify.raise(c * TONGUE_MODIFY_SCALE);
                modify.direction = Some(ActionDirection::Increase);
            }
            MotorClass::Rest => {
                for acc in self.accumulators.iter_mut() {
                    acc.confidence *= REST_DECAY;
                }
            }
        }

        if c < self.threshold {
            return None;
        }
        self.try_trigger(now)
    }

    fn try_trigger(&mut self, now: Millis) -> Option<ActionTrigger> {
        let threshold = self.threshold;
        let debounce = self.debounce_ms;
        let candidate = self
            .accumulators
            .iter_mut()
            .filter(|a| a.confidence >= threshold)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;
        let ready = candidate
            .last_triggered
            .map_or(true, |last| now.saturating_sub(last) >= debounce);
        if !ready {
            log::debug!("{} trigger suppressed by debounce", candidate.name.as_str());
            return None;
        }
        candidate.triggered = true;
        candidate.last_triggered = Some(now);
        let trigger = ActionTrigger {
            action: candidate.name,
            direction: candidate.direction,
            confidence: candidate.confidence,
            at: now,
        };
        log::info!("Action triggered: {}", trigger.describe());
        if self.log.len() == TRIGGER_LOG_LIMIT {
            self.log.pop_front();
        }
        self.log.push_back(trigger);
        Some(trigger)
    }
}
