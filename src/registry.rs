// src/registry.rs
//! Typed home for the dashboard modules.
//!
//! Modules register at construction; the coordinator only looks here once registration is
//! finished, so wiring never depends on start-up timing.

use std::cell::RefCell;
use std::rc::Rc;

use crate::actions::ActionEngine;
use crate::classifier::SignalClassifier;
use crate::decoder::MovementDecoder;
use crate::device::DeviceMonitor;
use crate::error::CoreError;
use crate::llm_bridge::LlmBridge;

pub type Shared<T> = Rc<RefCell<T>>;

pub const CLASSIFIER: &str = "classifier";
pub const ACTIONS: &str = "actions";
pub const DECODER: &str = "decoder";
pub const DEVICE: &str = "device";
pub const LANGUAGE: &str = "language";

#[derive(Default)]
pub struct ModuleRegistry {
    classifier: Option<Shared<SignalClassifier>>,
    actions: Option<Shared<ActionEngine>>,
    decoder: Option<Shared<MovementDecoder>>,
    device: Option<Shared<DeviceMonitor>>,
    language: Option<Shared<LlmBridge>>,
    finished: bool,
}

fn require<T>(slot: &Option<Shared<T>>, name: &'static str) -> Result<Shared<T>, CoreError> {
    slot.clone().ok_or(CoreError::MissingCollaborator(name))
}

fn share<T>(slot: &mut Option<Shared<T>>, module: T, name: &str) -> Shared<T> {
    if slot.is_some() {
        log::warn!("{name} registered twice; replacing the previous instance");
    }
    let shared = Rc::new(RefCell::new(module));
    *slot = Some(Rc::clone(&shared));
    log::debug!("registered {name}");
    shared
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_classifier(&mut self, module: SignalClassifier) -> Shared<SignalClassifier> {
        share(&mut self.classifier, module, CLASSIFIER)
    }

    pub fn register_actions(&mut self, module: ActionEngine) -> Shared<ActionEngine> {
        share(&mut self.actions, module, ACTIONS)
    }

    pub fn register_decoder(&mut self, module: MovementDecoder) -> Shared<MovementDecoder> {
        share(&mut self.decoder, module, DECODER)
    }

    pub fn register_device(&mut self, module: DeviceMonitor) -> Shared<DeviceMonitor> {
        share(&mut self.device, module, DEVICE)
    }

    pub fn register_language(&mut self, module: LlmBridge) -> Shared<LlmBridge> {
        share(&mut self.language, module, LANGUAGE)
    }

    pub fn classifier(&self) -> Result<Shared<SignalClassifier>, CoreError> {
        require(&self.classifier, CLASSIFIER)
    }

    pub fn actions(&self) -> Result<Shared<ActionEngine>, CoreError> {
        require(&self.actions, ACTIONS)
    }

    pub fn decoder(&self) -> Result<Shared<MovementDecoder>, CoreError> {
        require(&self.decoder, DECODER)
    }

    pub fn device(&self) -> Result<Shared<DeviceMonitor>, CoreError> {
        require(&self.device, DEVICE)
    }

    pub fn language(&self) -> Result<Shared<LlmBridge>, CoreError> {
        require(&self.language, LANGUAGE)
    }

    /// Marks registration complete. Returns `false` if it already was.
    pub fn finish(&mut self) -> bool {
        let first = !self.finished;
        self.finished = true;
        first
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Names of the registered modules, in a fixed order.
    pub fn present(&self) -> Vec<&'static str> {
        [
            (CLASSIFIER, self.classifier.is_some()),
            (ACTIONS, self.actions.is_some()),
            (DECODER, self.decoder.is_some()),
            (DEVICE, self.device.is_some()),
            (LANGUAGE, self.language.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}
