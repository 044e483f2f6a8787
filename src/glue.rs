// src/glue.rs
//! Cross-module wiring.
//!
//! Once registration is finished the coordinator subscribes one bridge per pair of present
//! modules. Absent modules are logged and skipped. Wiring is guarded and every subscription is
//! kept, so `wire` can be called again (or after `unwire`) without doubling delivery.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use anyhow::Context;

use crate::actions::ActionEngine;
use crate::bus::{BusEvent, EventBus, MovementRequest, Subscription, Topic, WeakEventBus};
use crate::classifier::SignalClassifier;
use crate::config::WiringConfig;
use crate::decoder::MovementDecoder;
use crate::error::CoreError;
use crate::llm_bridge::LlmBridge;
use crate::registry::{ModuleRegistry, Shared, ACTIONS, CLASSIFIER, DECODER, DEVICE, LANGUAGE};
use crate::types::MoveDirection;

const MOVEMENT_SOURCE: &str = "classifier";

/// Runs `f` on a module held only weakly by a bus handler.
fn with_module<T, R>(
    weak: &Weak<RefCell<T>>,
    name: &'static str,
    f: impl FnOnce(&mut T) -> R,
) -> anyhow::Result<R> {
    let module = weak.upgrade().ok_or(CoreError::MissingCollaborator(name))?;
    let mut guard = module
        .try_borrow_mut()
        .with_context(|| format!("{name} is busy"))?;
    Ok(f(&mut guard))
}

fn republish(relay: &WeakEventBus, event: BusEvent) -> anyhow::Result<()> {
    let bus = relay.upgrade().context("event bus dropped")?;
    bus.publish(event);
    Ok(())
}

/// What one wiring pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WiringReport {
    pub links: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

pub struct Coordinator {
    config: WiringConfig,
    subscriptions: Vec<Subscription>,
    wired: bool,
}

impl Coordinator {
    pub fn new(config: WiringConfig) -> Self {
        Self {
            config,
            subscriptions: Vec::new(),
            wired: false,
        }
    }

    pub fn is_wired(&self) -> bool {
        self.wired
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Drops every subscription this coordinator made. Returns how many were still live.
    pub fn unwire(&mut self) -> usize {
        let removed = self
            .subscriptions
            .drain(..)
            .filter(|s| s.unsubscribe())
            .count();
        self.wired = false;
        if removed > 0 {
            log::info!("Unwired {removed} subscription(s)");
        }
        removed
    }

    pub fn wire(&mut self, bus: &EventBus, registry: &ModuleRegistry) -> WiringReport {
        let mut report = WiringReport::default();
        if self.wired {
            log::debug!("wiring already in place; nothing to do");
            return report;
        }

        let classifier = registry.classifier().ok();
        let actions = registry.actions().ok();
        let decoder = registry.decoder().ok();
        let device = registry.device().ok();
        let language = registry.language().ok();
        for (name, present) in [
            (CLASSIFIER, classifier.is_some()),
            (ACTIONS, actions.is_some()),
            (DECODER, decoder.is_some()),
            (DEVICE, device.is_some()),
            (LANGUAGE, language.is_some()),
        ] {
            if !present {
                log::warn!("{}", CoreError::MissingCollaborator(name));
                report.skipped.push(name);
            }
        }

        if let (Some(_), Some(actions)) = (&classifier, &actions) {
            self.link_actions(bus, actions, language.as_ref());
            report.links.push("classification -> actions");
        }
        if let (Some(_), Some(_)) = (&classifier, &decoder) {
            self.link_movement_gate(bus);
            report.links.push("classification -> movement request");
        }
        if let Some(decoder) = &decoder {
            self.link_decoder_inputs(bus, decoder);
            report.links.push("movement/features -> decoder");
        }
        if let Some(classifier) = &classifier {
            self.link_classifier(bus, classifier);
            report.links.push("connection request/decoder ready -> classifier");
        }
        if let (Some(_), Some(language)) = (&classifier, &language) {
            self.link_guidance(bus, language);
            report.links.push("classification -> language guidance");
        }
        if device.is_some() {
            self.link_status_relay(bus);
            report.links.push("device status relay");
        }

        self.wired = true;
        log::info!(
            "Wired {} link(s) over {} subscription(s)",
            report.links.len(),
            self.subscriptions.len()
        );
        report
    }

    fn keep(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    fn link_actions(
        &mut self,
        bus: &EventBus,
        actions: &Shared<ActionEngine>,
        language: Option<&Shared<LlmBridge>>,
    ) {
        let actions = Rc::downgrade(actions);
        let language = language.map(Rc::downgrade);
        self.keep(bus.subscribe(Topic::ClassificationUpdated, move |event| {
            let BusEvent::ClassificationUpdated(classification) = event else {
                return Ok(());
            };
            let trigger = with_module(&actions, ACTIONS, |engine| {
                engine.handle(classification, classification.timestamp)
            })?;
            if let (Some(trigger), Some(language)) = (trigger, &language) {
                with_module(language, LANGUAGE, |bridge| bridge.record_action(&trigger))?;
            }
            Ok(())
        }));
    }

    fn link_movement_gate(&mut self, bus: &EventBus) {
        let gate = self.config.movement_gate;
        let relay = bus.downgrade();
        self.keep(bus.subscribe(Topic::ClassificationUpdated, move |event| {
            let BusEvent::ClassificationUpdated(classification) = event else {
                return Ok(());
            };
            if classification.confidence < gate {
                return Ok(());
            }
            let Some(direction) = MoveDirection::from_class(classification.class) else {
                return Ok(());
            };
            republish(
                &relay,
                BusEvent::MovementRequest(MovementRequest {
                    direction,
                    confidence: classification.confidence,
                    source: MOVEMENT_SOURCE.to_owned(),
                }),
            )
        }));
    }

    fn link_decoder_inputs(&mut self, bus: &EventBus, decoder: &Shared<MovementDecoder>) {
        let weak = Rc::downgrade(decoder);
        self.keep(bus.subscribe(Topic::MovementRequest, move |event| {
            if let BusEvent::MovementRequest(request) = event {
                with_module(&weak, DECODER, |d| d.handle_movement_request(request))?;
            }
            Ok(())
        }));
        let weak = Rc::downgrade(decoder);
        self.keep(bus.subscribe(Topic::FeaturesExtracted, move |event| {
            if let BusEvent::FeaturesExtracted(payload) = event {
                with_module(&weak, DECODER, |d| d.handle_features(payload))?;
            }
            Ok(())
        }));
    }

    fn link_classifier(&mut self, bus: &EventBus, classifier: &Shared<SignalClassifier>) {
        let weak = Rc::downgrade(classifier);
        let responder = bus.downgrade();
        self.keep(bus.subscribe(Topic::ConnectionRequest, move |event| {
            let BusEvent::ConnectionRequest(request) = event else {
                return Ok(());
            };
            let response = with_module(&weak, CLASSIFIER, |c| c.connection_response(request))?;
            republish(&responder, BusEvent::ConnectionResponse(response))
        }));

        let relay = bus.downgrade();
        self.keep(bus.subscribe(Topic::DecoderReady, move |event| {
            match event {
                BusEvent::DecoderReady(capabilities) => {
                    republish(&relay, BusEvent::ProcessorDecoderReady(capabilities.clone()))
                }
                _ => Ok(()),
            }
        }));

        let weak = Rc::downgrade(classifier);
        self.keep(bus.subscribe(Topic::ProcessorDecoderReady, move |_| {
            with_module(&weak, CLASSIFIER, |c| c.set_decoder_bridge(true))
        }));
    }

    fn link_guidance(&mut self, bus: &EventBus, language: &Shared<LlmBridge>) {
        let weak = Rc::downgrade(language);
        self.keep(bus.subscribe(Topic::ClassificationUpdated, move |event| {
            if let BusEvent::ClassificationUpdated(classification) = event {
                with_module(&weak, LANGUAGE, |bridge| bridge.apply_guidance(classification))?;
            }
            Ok(())
        }));
    }

    fn link_status_relay(&mut self, bus: &EventBus) {
        let relay = bus.downgrade();
        self.keep(bus.subscribe(Topic::BciStatusUpdated, move |event| {
            match event {
                BusEvent::BciStatusUpdated(status) => {
                    republish(&relay, BusEvent::ProcessorBciStatus(*status))
                }
                _ => Ok(()),
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActionConfig, ClassifierConfig, DecoderConfig, DeviceConfig, LlmConfig};
    use crate::device::DeviceMonitor;
    use crate::drivers::source::ManualSource;
    use crate::types::{ActionName, ClassificationEvent, MotorClass};
    use std::cell::Cell;

    fn full_registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register_classifier(SignalClassifier::new(
            ClassifierConfig::default(),
            Box::new(ManualSource::new(vec![])),
        ));
        registry.register_actions(ActionEngine::new(&ActionConfig::default()));
        registry.register_decoder(MovementDecoder::new(DecoderConfig::default(), Some(2)));
        registry.register_device(DeviceMonitor::new(DeviceConfig::default(), Some(2)));
        registry.register_language(LlmBridge::new(LlmConfig::default(), Some(2)));
        registry
    }

    fn classify(bus: &EventBus, class: MotorClass, confidence: f64, at: u64) {
        bus.publish(BusEvent::ClassificationUpdated(ClassificationEvent::new(
            class, confidence, at,
        )));
    }

    #[test]
    fn classification_reaches_actions_decoder_and_language() {
        let bus = EventBus::new();
        let registry = full_registry();
        let mut coordinator = Coordinator::new(WiringConfig::default());
        let report = coordinator.wire(&bus, &registry);
        assert!(report.skipped.is_empty());

        classify(&bus, MotorClass::RightHand, 0.9, 100);
        let actions = registry.actions().unwrap();
        assert!(actions.borrow().get(ActionName::Navigate).active());
        assert_eq!(registry.decoder().unwrap().borrow().movement_requests(), 1);
        let language = registry.language().unwrap();
        assert_eq!(
            language.borrow().guidance().map(|g| g.class),
            Some(MotorClass::RightHand)
        );
        assert_eq!(
            language.borrow().recent_actions().collect::<Vec<_>>(),
            vec!["navigate (forward)"]
        );
    }

    #[test]
    fn movement_gate_and_rest_are_respected() {
        let bus = EventBus::new();
        let registry = full_registry();
        let mut coordinator = Coordinator::new(WiringConfig::default());
        coordinator.wire(&bus, &registry);
        classify(&bus, MotorClass::LeftHand, 0.6, 0);
        classify(&bus, MotorClass::Rest, 0.95, 10);
        assert_eq!(registry.decoder().unwrap().borrow().movement_requests(), 0);
        classify(&bus, MotorClass::LeftHand, 0.65, 20);
        assert_eq!(registry.decoder().unwrap().borrow().movement_requests(), 1);
    }

    #[test]
    fn wiring_twice_does_not_duplicate_delivery() {
        let bus = EventBus::new();
        let registry = full_registry();
        let mut coordinator = Coordinator::new(WiringConfig::default());
        coordinator.wire(&bus, &registry);
        let count = coordinator.subscription_count();
        assert!(coordinator.wire(&bus, &registry).links.is_empty());
        assert_eq!(coordinator.subscription_count(), count);

        assert_eq!(coordinator.unwire(), count);
        coordinator.wire(&bus, &registry);
        classify(&bus, MotorClass::Feet, 0.9, 0);
        assert_eq!(registry.decoder().unwrap().borrow().movement_requests(), 1);
    }

    #[test]
    fn missing_collaborators_are_skipped() {
        let bus = EventBus::new();
        let mut registry = ModuleRegistry::new();
        registry.register_device(DeviceMonitor::new(DeviceConfig::default(), Some(3)));
        let mut coordinator = Coordinator::new(WiringConfig::default());
        let report = coordinator.wire(&bus, &registry);
        assert_eq!(report.links, vec!["device status relay"]);
        assert_eq!(report.skipped.len(), 4);

        let relayed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&relayed);
        bus.subscribe(Topic::ProcessorBciStatus, move |_| {
            flag.set(true);
            Ok(())
        });
        let event = registry.device().unwrap().borrow_mut().toggle_connection();
        bus.publish(event);
        assert!(relayed.get());
        classify(&bus, MotorClass::Tongue, 0.99, 0);
        assert_eq!(bus.fault_count(), 0);
    }

    #[test]
    fn decoder_ready_enables_the_bridge_and_handshake_is_answered() {
        let bus = EventBus::new();
        let registry = full_registry();
        let mut coordinator = Coordinator::new(WiringConfig::default());
        coordinator.wire(&bus, &registry);
        let classifier = registry.classifier().unwrap();
        assert!(!classifier.borrow().decoder_bridge());
        let ready = registry.decoder().unwrap().borrow().ready_event();
        bus.publish(ready);
        assert!(classifier.borrow().decoder_bridge());

        let language = registry.language().unwrap();
        let weak = Rc::downgrade(&language);
        bus.subscribe_once(Topic::ConnectionResponse, move |event| {
            if let BusEvent::ConnectionResponse(response) = event {
                with_module(&weak, LANGUAGE, |b| b.on_connection_response(response))?;
            }
            Ok(())
        });
        let request = language.borrow_mut().begin_handshake(0, 2000);
        bus.publish(request.unwrap());
        assert_eq!(language.borrow().connection().label(), "standby");
    }

    #[test]
    fn dropped_module_turns_into_handler_fault() {
        let bus = EventBus::new();
        let mut registry = full_registry();
        let mut coordinator = Coordinator::new(WiringConfig::default());
        coordinator.wire(&bus, &registry);
        // replacing the decoder orphans the weak handle the bridge holds
        registry.register_decoder(MovementDecoder::new(DecoderConfig::default(), Some(9)));
        classify(&bus, MotorClass::Feet, 0.9, 0);
        assert!(bus.fault_count() >= 1);
        assert!(registry.actions().unwrap().borrow().get(ActionName::Modify).active());
    }
}
