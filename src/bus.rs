// src/bus.rs
//! Topic-addressed publish/subscribe for the dashboard modules.
//!
//! Delivery is synchronous and in registration order. A handler that returns `Err` or panics is
//! logged and skipped; the remaining handlers for the same publish still run. The bus is a cheap
//! `Rc` handle, so every test can build its own isolated instance.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{
    ClassificationEvent, ExtractedFeatures, Millis, MoveDirection, MovementParameters,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    FeaturesExtracted,
    ClassificationUpdated,
    ProcessorDecoderReady,
    DecoderReady,
    LlamaReady,
    ConnectionRequest,
    ConnectionResponse,
    LlamaActivation,
    MovementRequest,
    BciStatusUpdated,
    ProcessorBciStatus,
}

impl Topic {
    pub const ALL: [Topic; 11] = [
        Topic::FeaturesExtracted,
        Topic::ClassificationUpdated,
        Topic::ProcessorDecoderReady,
        Topic::DecoderReady,
        Topic::LlamaReady,
        Topic::ConnectionRequest,
        Topic::ConnectionResponse,
        Topic::LlamaActivation,
        Topic::MovementRequest,
        Topic::BciStatusUpdated,
        Topic::ProcessorBciStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeaturesExtracted => "processor:features-extracted",
            Self::ClassificationUpdated => "processor:classification-updated",
            Self::ProcessorDecoderReady => "processor:decoder-ready",
            Self::DecoderReady => "decoder:ready",
            Self::LlamaReady => "neuro-llama:ready",
            Self::ConnectionRequest => "neuro-llama:connection-request",
            Self::ConnectionResponse => "processor:connection-response",
            Self::LlamaActivation => "neuro-llama:activation",
            Self::MovementRequest => "decoder:movement-request",
            Self::BciStatusUpdated => "bci:status-updated",
            Self::ProcessorBciStatus => "processor:bci-status",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownTopic(s.to_owned()))
    }
}

// ── Payloads ────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesExtracted {
    pub features: ExtractedFeatures,
    pub movement_parameters: MovementParameters,
    pub timestamp: Millis,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderCapabilities {
    pub supported_features: Vec<String>,
    pub trajectory_types: Vec<String>,
    pub decoder_types: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlamaReady {
    pub concept_mapping: BTreeMap<String, Vec<String>>,
    pub action_verbs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub timestamp: Millis,
    pub client_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Connected,
    Standby,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    pub status: ResponseStatus,
    pub features: Vec<String>,
    pub client_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    pub active: bool,
    pub timestamp: Millis,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub direction: MoveDirection,
    pub confidence: f64,
    pub source: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BciStatus {
    pub signal_quality: f64,
    pub battery_level: f64,
    pub connected: bool,
}

/// A payload together with the topic it travels on.
#[derive(Clone, Debug, PartialEq)]
pub enum BusEvent {
    FeaturesExtracted(FeaturesExtracted),
    ClassificationUpdated(ClassificationEvent),
    ProcessorDecoderReady(DecoderCapabilities),
    DecoderReady(DecoderCapabilities),
    LlamaReady(LlamaReady),
    ConnectionRequest(ConnectionRequest),
    ConnectionResponse(ConnectionResponse),
    LlamaActivation(Activation),
    MovementRequest(MovementRequest),
    BciStatusUpdated(BciStatus),
    ProcessorBciStatus(BciStatus),
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::FeaturesExtracted(_) => Topic::FeaturesExtracted,
            Self::ClassificationUpdated(_) => Topic::ClassificationUpdated,
            Self::ProcessorDecoderReady(_) => Topic::ProcessorDecoderReady,
            Self::DecoderReady(_) => Topic::DecoderReady,
            Self::LlamaReady(_) => Topic::LlamaReady,
            Self::ConnectionRequest(_) => Topic::ConnectionRequest,
            Self::ConnectionResponse(_) => Topic::ConnectionResponse,
            Self::LlamaActivation(_) => Topic::LlamaActivation,
            Self::MovementRequest(_) => Topic::MovementRequest,
            Self::BciStatusUpdated(_) => Topic::BciStatusUpdated,
            Self::ProcessorBciStatus(_) => Topic::ProcessorBciStatus,
        }
    }

    /// JSON form of the payload alone, as it travels on the wire.
    pub fn payload_json(&self) -> Result<serde_json::Value, CoreError> {
        let value = match self {
            Self::FeaturesExtracted(p) => serde_json::to_value(p)?,
            Self::ClassificationUpdated(p) => serde_json::to_value(p)?,
            Self::ProcessorDecoderReady(p) | Self::DecoderReady(p) => serde_json::to_value(p)?,
            Self::LlamaReady(p) => serde_json::to_value(p)?,
            Self::ConnectionRequest(p) => serde_json::to_value(p)?,
            Self::ConnectionResponse(p) => serde_json::to_value(p)?,
            Self::LlamaActivation(p) => serde_json::to_value(p)?,
            Self::MovementRequest(p) => serde_json::to_value(p)?,
            Self::BciStatusUpdated(p) | Self::ProcessorBciStatus(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Rebuilds an event from a topic name and its JSON payload.
    pub fn from_json(topic: &str, payload: serde_json::Value) -> Result<Self, CoreError> {
        let event = match topic.parse::<Topic>()? {
            Topic::FeaturesExtracted => Self::FeaturesExtracted(serde_json::from_value(payload)?),
            Topic::ClassificationUpdated => {
                Self::ClassificationUpdated(serde_json::from_value(payload)?)
            }
            Topic::ProcessorDecoderReady => {
                Self::ProcessorDecoderReady(serde_json::from_value(payload)?)
            }
            Topic::DecoderReady => Self::DecoderReady(serde_json::from_value(payload)?),
            Topic::LlamaReady => Self::LlamaReady(serde_json::from_value(payload)?),
            Topic::ConnectionRequest => Self::ConnectionRequest(serde_json::from_value(payload)?),
            Topic::ConnectionResponse => {
                Self::ConnectionResponse(serde_json::from_value(payload)?)
            }
            Topic::LlamaActivation => Self::LlamaActivation(serde_json::from_value(payload)?),
            Topic::MovementRequest => Self::MovementRequest(serde_json::from_value(payload)?),
            Topic::BciStatusUpdated => Self::BciStatusUpdated(serde_json::from_value(payload)?),
            Topic::ProcessorBciStatus => {
                Self::ProcessorBciStatus(serde_json::from_value(payload)?)
            }
        };
        Ok(event)
    }
}

// ── Bus ─────────────────────────────────────────────────

pub type HandlerResult = anyhow::Result<()>;
type Handler = Rc<dyn Fn(&BusEvent) -> HandlerResult>;

struct Listener {
    id: u64,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<Topic, Vec<Listener>>,
    faults: u64,
}

impl Registry {
    fn contains(&self, topic: Topic, id: u64) -> bool {
        self.topics
            .get(&topic)
            .map(|ls| ls.iter().any(|l| l.id == id))
            .unwrap_or(false)
    }

    fn remove(&mut self, topic: Topic, id: u64) -> bool {
        let Some(listeners) = self.topics.get_mut(&topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }
}

/// Outcome of a single publish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub faults: usize,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<RefCell<Registry>>,
}

/// Handle returned by `subscribe`; call `unsubscribe` to stop delivery.
#[derive(Clone)]
pub struct Subscription {
    registry: Weak<RefCell<Registry>>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Returns `false` when the listener was already gone.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.borrow_mut().remove(self.topic, self.id),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map(|r| r.borrow().contains(self.topic, self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

/// Non-owning bus handle for handlers that publish; avoids a bus -> handler -> bus cycle.
#[derive(Clone)]
pub struct WeakEventBus {
    inner: Weak<RefCell<Registry>>,
}

impl WeakEventBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> HandlerResult + 'static,
    {
        self.register(topic, false, Rc::new(handler))
    }

    /// Delivered at most once, then removed.
    pub fn subscribe_once<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> HandlerResult + 'static,
    {
        self.register(topic, true, Rc::new(handler))
    }

    fn register(&self, topic: Topic, once: bool, handler: Handler) -> Subscription {
        let mut registry = self.inner.borrow_mut();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .topics
            .entry(topic)
            .or_default()
            .push(Listener { id, once, handler });
        log::trace!("subscribed #{id} to {topic}");
        Subscription {
            registry: Rc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    pub fn publish(&self, event: BusEvent) -> Delivery {
        let topic = event.topic();
        // Snapshot first so handlers may publish or (un)subscribe while we deliver.
        let snapshot: Vec<(u64, bool, Handler)> = {
            let registry = self.inner.borrow();
            let Some(listeners) = registry.topics.get(&topic) else {
                return Delivery::default();
            };
            listeners
                .iter()
                .map(|l| (l.id, l.once, Rc::clone(&l.handler)))
                .collect()
        };

        let mut delivery = Delivery::default();
        for (id, once, handler) in snapshot {
            // A once-listener is claimed right before delivery; an earlier unsubscribe wins.
            let live = if once {
                self.inner.borrow_mut().remove(topic, id)
            } else {
                self.inner.borrow().contains(topic, id)
            };
            if !live {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            match outcome {
                Ok(Ok(())) => delivery.delivered += 1,
                Ok(Err(err)) => {
                    delivery.faults += 1;
                    self.record_fault(CoreError::HandlerFault {
                        topic: topic.as_str().to_owned(),
                        reason: format!("{err:#}"),
                    });
                }
                Err(payload) => {
                    delivery.faults += 1;
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_owned())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "handler panicked".to_owned());
                    self.record_fault(CoreError::HandlerFault {
                        topic: topic.as_str().to_owned(),
                        reason,
                    });
                }
            }
        }
        delivery
    }

    fn record_fault(&self, err: CoreError) {
        log::warn!("{err}");
        self.inner.borrow_mut().faults += 1;
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        self.inner
            .borrow()
            .topics
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total handler faults isolated since construction.
    pub fn fault_count(&self) -> u64 {
        self.inner.borrow().faults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MotorClass;
    use anyhow::anyhow;
    use std::cell::Cell;

    fn classification(confidence: f64) -> BusEvent {
        BusEvent::ClassificationUpdated(ClassificationEvent::new(
            MotorClass::Feet,
            confidence,
            10,
        ))
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let seen = Rc::clone(&seen);
            bus.subscribe(Topic::ClassificationUpdated, move |_| {
                seen.borrow_mut().push(n);
                Ok(())
            });
        }
        let delivery = bus.publish(classification(0.7));
        assert_eq!(delivery.delivered, 3);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_handlers_do_not_block_later_ones() {
        let bus = EventBus::new();
        let reached = Rc::new(Cell::new(false));
        bus.subscribe(Topic::ClassificationUpdated, |_| Err(anyhow!("boom")));
        bus.subscribe(Topic::ClassificationUpdated, |_| panic!("handler exploded"));
        let flag = Rc::clone(&reached);
        bus.subscribe(Topic::ClassificationUpdated, move |_| {
            flag.set(true);
            Ok(())
        });
        let delivery = bus.publish(classification(0.7));
        assert!(reached.get());
        assert_eq!(delivery, Delivery { delivered: 1, faults: 2 });
        assert_eq!(bus.fault_count(), 2);
    }

    #[test]
    fn once_listener_fires_a_single_time() {
        let bus = EventBus::new();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let sub = bus.subscribe_once(Topic::ClassificationUpdated, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        bus.publish(classification(0.6));
        bus.publish(classification(0.6));
        assert_eq!(hits.get(), 1);
        assert!(!sub.is_active());
        assert_eq!(bus.listener_count(Topic::ClassificationUpdated), 0);
    }

    #[test]
    fn once_listener_unsubscribed_mid_publish_is_skipped() {
        let bus = EventBus::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let target = Rc::clone(&slot);
        bus.subscribe(Topic::ClassificationUpdated, move |_| {
            if let Some(sub) = target.borrow().as_ref() {
                assert!(sub.unsubscribe());
            }
            Ok(())
        });
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let once = bus.subscribe_once(Topic::ClassificationUpdated, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        *slot.borrow_mut() = Some(once.clone());
        let delivery = bus.publish(classification(0.6));
        assert_eq!(hits.get(), 0);
        assert_eq!(delivery.delivered, 1);
        assert!(!once.is_active());
        assert_eq!(bus.listener_count(Topic::ClassificationUpdated), 1);
    }

    #[test]
    fn nested_publish_delivers_a_once_listener_only_once() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let depth = Rc::new(Cell::new(0));
        let level = Rc::clone(&depth);
        bus.subscribe(Topic::ClassificationUpdated, move |_| {
            if level.get() == 0 {
                level.set(1);
                inner_bus.publish(classification(0.6));
            }
            Ok(())
        });
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        bus.subscribe_once(Topic::ClassificationUpdated, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        bus.publish(classification(0.6));
        assert_eq!(hits.get(), 1);
        assert_eq!(bus.listener_count(Topic::ClassificationUpdated), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_late_listeners_miss_past_events() {
        let bus = EventBus::new();
        let hits = Rc::new(Cell::new(0));
        bus.publish(classification(0.9));
        let counter = Rc::clone(&hits);
        let sub = bus.subscribe(Topic::ClassificationUpdated, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        assert_eq!(hits.get(), 0);
        bus.publish(classification(0.9));
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        bus.publish(classification(0.9));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn handlers_may_publish_on_other_topics() {
        let bus = EventBus::new();
        let relayed = Rc::new(Cell::new(false));
        let inner_bus = bus.clone();
        bus.subscribe(Topic::BciStatusUpdated, move |event| {
            if let BusEvent::BciStatusUpdated(status) = event {
                inner_bus.publish(BusEvent::ProcessorBciStatus(*status));
            }
            Ok(())
        });
        let flag = Rc::clone(&relayed);
        bus.subscribe(Topic::ProcessorBciStatus, move |_| {
            flag.set(true);
            Ok(())
        });
        bus.publish(BusEvent::BciStatusUpdated(BciStatus {
            signal_quality: 90.0,
            battery_level: 80.0,
            connected: true,
        }));
        assert!(relayed.get());
    }

    #[test]
    fn payloads_use_wire_field_names() {
        let event = BusEvent::ConnectionResponse(ConnectionResponse {
            status: ResponseStatus::Standby,
            features: vec!["classification".into()],
            client_id: "abc".into(),
        });
        let json = event.payload_json().unwrap();
        assert_eq!(json["status"], "standby");
        assert_eq!(json["clientId"], "abc");
        let back = BusEvent::from_json(event.topic().as_str(), json).unwrap();
        assert_eq!(back, event);
        assert!(BusEvent::from_json("nope:nothing", serde_json::Value::Null).is_err());
    }
}
