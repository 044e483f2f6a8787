// src/engine.rs
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;

use crate::actions::{ActionAccumulator, ActionEngine, ActionTrigger};
use crate::bus::{BusEvent, EventBus, Subscription, Topic};
use crate::classifier::{nested_attention, ClassifierState, DecodedPoint, SignalClassifier};
use crate::config::DashboardConfig;
use crate::decoder::{DecoderMetrics, MovementDecoder, TrajectoryPoint};
use crate::device::{DeviceMonitor, ElectrodeStatus, ImpedanceCheck};
use crate::drivers::plot::{render_attention_png, render_trajectory_png, PlotStyle};
use crate::error::CoreError;
use crate::glue::{Coordinator, WiringReport};
use crate::llm_bridge::{Generation, GenerationParameters, HistoryEntry, LlmBridge};
use crate::registry::ModuleRegistry;
use crate::scheduler::{Scheduler, TimerId, TimerTag};
use crate::types::{
    ClassificationEvent, DecoderModel, EngineMessage, FeatureMode, GuiCommand, Millis,
    MotorClass, MovementParameters, TrajectoryType,
};

const ACTIVITY_LOG: usize = 50;
const HISTORY_IN_SNAPSHOT: usize = 10;
const SNAPSHOT_EVERY: Duration = Duration::from_millis(100);
const IDLE_SLEEP: Duration = Duration::from_millis(10);

// ── Snapshot (engine -> GUI) ────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct ClassifierView {
    pub state: ClassifierState,
    pub classification: ClassificationEvent,
    pub band_means: BTreeMap<String, f64>,
    pub band_powers: BTreeMap<String, Vec<f64>>,
    pub attention_head: Vec<Vec<f64>>,
    pub decoded: Vec<DecodedPoint>,
    pub decoder_bridge: bool,
    pub feature_mode: FeatureMode,
    pub ticks: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ActionsView {
    pub enabled: bool,
    pub threshold: f64,
    pub accumulators: Vec<ActionAccumulator>,
    pub recent: Vec<ActionTrigger>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DecoderView {
    pub model: DecoderModel,
    pub trajectory: TrajectoryType,
    pub metrics: DecoderMetrics,
    pub points: Vec<TrajectoryPoint>,
    pub movement_requests: u64,
    pub last_features: Option<(MotorClass, MovementParameters)>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceView {
    pub connected: bool,
    pub recording_secs: u64,
    pub battery_pct: f64,
    pub storage_pct: f64,
    pub signal_quality: f64,
    pub electrodes: Vec<ElectrodeStatus>,
    pub impedance_check: ImpedanceCheck,
}

#[derive(Clone, Debug, Serialize)]
pub struct LanguageView {
    pub active: bool,
    pub connection: String,
    pub guidance: Option<ClassificationEvent>,
    pub parameters: GenerationParameters,
    pub history: Vec<HistoryEntry>,
    pub last_generation: Option<Generation>,
}

/// Everything the dashboard draws, as plain owned data.
#[derive(Clone, Debug, Serialize)]
pub struct DashboardSnapshot {
    pub now: Millis,
    pub wired: bool,
    pub bus_faults: u64,
    pub classifier: Option<ClassifierView>,
    pub actions: Option<ActionsView>,
    pub decoder: Option<DecoderView>,
    pub device: Option<DeviceView>,
    pub language: Option<LanguageView>,
    pub activity: Vec<String>,
}

// ── Runtime ─────────────────────────────────────────────

#[derive(Default)]
struct Timers {
    classifier: Option<TimerId>,
    impedance: Option<TimerId>,
    handshake: Option<TimerId>,
}

/// Owns the bus, the clock and every module; everything runs on the caller's thread.
pub struct Dashboard {
    config: DashboardConfig,
    bus: EventBus,
    scheduler: Scheduler,
    registry: ModuleRegistry,
    coordinator: Coordinator,
    timers: Timers,
    handshake: Option<Subscription>,
    activity: VecDeque<String>,
    last_generation: Option<Generation>,
}

impl Dashboard {
    /// Builds the enabled modules and arms their timers. Wiring happens after the startup delay.
    pub fn new(config: DashboardConfig) -> Self {
        let seed = config.seed;
        let derive = |offset: u64| seed.map(|s| s.wrapping_add(offset));
        let mut registry = ModuleRegistry::new();
        let mut scheduler = Scheduler::new();
        let toggles = &config.modules;

        if toggles.classifier {
            registry.register_classifier(SignalClassifier::from_config(
                config.classifier.clone(),
                derive(1),
            ));
        }
        if toggles.actions {
            registry.register_actions(ActionEngine::new(&config.actions));
        }
        if toggles.decoder {
            registry.register_decoder(MovementDecoder::new(config.decoder.clone(), derive(2)));
            scheduler.every(config.decoder.tick_ms, TimerTag::DecoderTick);
        }
        if toggles.device {
            registry.register_device(DeviceMonitor::new(config.device.clone(), derive(3)));
            scheduler.every(config.device.tick_ms, TimerTag::DeviceTick);
        }
        if toggles.language {
            registry.register_language(LlmBridge::new(config.llm.clone(), derive(4)));
        }
        scheduler.after(config.wiring.startup_delay_ms, TimerTag::StartupWiring);
        log::info!("Dashboard modules: {}", registry.present().join(", "));

        Self {
            coordinator: Coordinator::new(config.wiring.clone()),
            bus: EventBus::new(),
            scheduler,
            registry,
            timers: Timers::default(),
            handshake: None,
            activity: VecDeque::with_capacity(ACTIVITY_LOG),
            last_generation: None,
            config,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn now(&self) -> Millis {
        self.scheduler.now()
    }

    pub fn is_wired(&self) -> bool {
        self.coordinator.is_wired()
    }

    fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{message}");
        if self.activity.len() == ACTIVITY_LOG {
            self.activity.pop_front();
        }
        self.activity.push_back(message);
    }

    fn publish_all(&self, events: Vec<BusEvent>) {
        for event in events {
            self.bus.publish(event);
        }
    }

    /// Ends registration and wires the modules. Safe to call more than once.
    pub fn finish_registration(&mut self) -> WiringReport {
        let first = self.registry.finish();
        let report = self.coordinator.wire(&self.bus, &self.registry);
        if !first {
            return report;
        }
        let mut announcements = Vec::new();
        if let Ok(decoder) = self.registry.decoder() {
            announcements.push(decoder.borrow().ready_event());
        }
        if let Ok(language) = self.registry.language() {
            announcements.push(language.borrow().ready_event());
        }
        self.publish_all(announcements);
        self.note(format!("Wiring complete: {} link(s)", report.links.len()));
        report
    }

    /// Drops and rebuilds every cross-module subscription.
    pub fn rewire(&mut self) -> WiringReport {
        self.coordinator.unwire();
        self.coordinator.wire(&self.bus, &self.registry)
    }

    /// Runs every timer due up to `until`, in due order.
    pub fn advance(&mut self, until: Millis) {
        while let Some((_, tag)) = self.scheduler.next_due(until) {
            let now = self.scheduler.now();
            self.dispatch(tag, now);
        }
        self.scheduler.settle(until);
    }

    fn dispatch(&mut self, tag: TimerTag, now: Millis) {
        match tag {
            TimerTag::ClassifierTick => {
                if let Ok(classifier) = self.registry.classifier() {
                    let events = classifier.borrow_mut().tick(now);
                    self.publish_all(events);
                }
            }
            TimerTag::DecoderTick => {
                if let Ok(decoder) = self.registry.decoder() {
                    decoder.borrow_mut().tick(now);
                }
            }
            TimerTag::DeviceTick => {
                if let Ok(device) = self.registry.device() {
                    let event = device.borrow_mut().tick();
                    self.publish_all(event.into_iter().collect());
                }
            }
            TimerTag::ImpedanceStep => self.step_impedance(),
            TimerTag::StartupWiring => {
                self.finish_registration();
            }
            TimerTag::HandshakeTimeout => self.expire_handshake(now),
        }
    }

    fn step_impedance(&mut self) {
        let Ok(device) = self.registry.device() else {
            return;
        };
        let state = device.borrow_mut().step_impedance_check();
        if !matches!(state, ImpedanceCheck::Running { .. }) {
            if let Some(id) = self.timers.impedance.take() {
                self.scheduler.cancel(id);
            }
            self.note("Impedance check finished");
        }
    }

    fn expire_handshake(&mut self, now: Millis) {
        self.timers.handshake = None;
        if let Some(sub) = self.handshake.take() {
            sub.unsubscribe();
        }
        if let Ok(language) = self.registry.language() {
            if language.borrow_mut().on_handshake_timeout(now) {
                self.note("Language bridge handshake timed out");
            }
        }
    }

    /// Starts a handshake: a one-shot listener for the response raced against a timeout timer.
    pub fn connect_language_bridge(&mut self) -> Result<(), CoreError> {
        let language = self.registry.language()?;
        let now = self.now();
        let timeout = self.config.wiring.handshake_timeout_ms;
        let Some(request) = language.borrow_mut().begin_handshake(now, timeout) else {
            return Ok(());
        };

        let weak = Rc::downgrade(&language);
        self.handshake = Some(self.bus.subscribe_once(Topic::ConnectionResponse, move |event| {
            let BusEvent::ConnectionResponse(response) = event else {
                return Ok(());
            };
            let language = weak.upgrade().ok_or(CoreError::MissingCollaborator("language"))?;
            language.borrow_mut().on_connection_response(response);
            Ok(())
        }));
        self.timers.handshake = Some(self.scheduler.after(timeout, TimerTag::HandshakeTimeout));
        self.bus.publish(request);

        let label = language.borrow().connection().label();
        if label != "pending" {
            if let Some(id) = self.timers.handshake.take() {
                self.scheduler.cancel(id);
            }
            self.handshake = None;
            self.note(format!("Language bridge {label}"));
        }
        Ok(())
    }

    pub fn handle_command(&mut self, command: GuiCommand) -> Result<(), CoreError> {
        let now = self.now();
        match command {
            GuiCommand::StartClassifier => {
                let classifier = self.registry.classifier()?;
                let tick = classifier.borrow().tick_ms();
                if classifier.borrow_mut().start() {
                    self.timers.classifier =
                        Some(self.scheduler.every(tick, TimerTag::ClassifierTick));
                    self.note("Classifier started");
                }
            }
            GuiCommand::StopClassifier => {
                if self.registry.classifier()?.borrow_mut().stop() {
                    self.disarm_classifier();
                    self.note("Classifier stopped");
                }
            }
            GuiCommand::ResetClassifier => {
                self.registry.classifier()?.borrow_mut().reset();
                self.disarm_classifier();
                self.note("Classifier reset");
            }
            GuiCommand::ForceClass(class, confidence) => {
                let event = self
                    .registry
                    .classifier()?
                    .borrow_mut()
                    .set_simulated_class(class, confidence, now);
                self.bus.publish(event);
            }
            GuiCommand::SetDecoderBridge(enabled) => {
                self.registry.classifier()?.borrow_mut().set_decoder_bridge(enabled);
            }
            GuiCommand::SetFeatureMode(mode) => {
                self.registry.classifier()?.borrow_mut().set_feature_mode(mode);
            }
            GuiCommand::SetActionsEnabled(enabled) => {
                self.registry.actions()?.borrow_mut().set_enabled(enabled);
            }
            GuiCommand::SetTriggerThreshold(threshold) => {
                self.registry.actions()?.borrow_mut().set_threshold(threshold);
            }
            GuiCommand::SetDecoderModel(model) => {
                self.registry.decoder()?.borrow_mut().set_model(model, now);
            }
            GuiCommand::SetTrajectoryType(kind) => {
                self.registry.decoder()?.borrow_mut().set_trajectory_type(kind, now);
            }
            GuiCommand::ToggleDevice => {
                let event = self.registry.device()?.borrow_mut().toggle_connection();
                self.bus.publish(event);
            }
            GuiCommand::RunImpedanceCheck => {
                let device = self.registry.device()?;
                let step = device.borrow().impedance_step_ms();
                if device.borrow_mut().start_impedance_check() {
                    self.timers.impedance =
                        Some(self.scheduler.every(step, TimerTag::ImpedanceStep));
                }
            }
            GuiCommand::ConnectLanguageBridge => self.connect_language_bridge()?,
            GuiCommand::SetLanguageBridgeActive(active) => {
                let event = self.registry.language()?.borrow_mut().set_active(active, now);
                self.bus.publish(event);
            }
            GuiCommand::Generate(prompt) => {
                let generation = self.registry.language()?.borrow_mut().generate(&prompt, now)?;
                self.note(format!("Generated: {}", generation.text));
                self.last_generation = Some(generation);
            }
            GuiCommand::Rewire => {
                let report = self.rewire();
                self.note(format!("Rewired: {} link(s)", report.links.len()));
            }
            GuiCommand::ExportTrajectory(path) => self.export_trajectory(&path)?,
            GuiCommand::ExportAttention(path) => self.export_attention(&path)?,
            GuiCommand::Shutdown => {}
        }
        Ok(())
    }

    fn disarm_classifier(&mut self) {
        if let Some(id) = self.timers.classifier.take() {
            self.scheduler.cancel(id);
        }
    }

    pub fn export_trajectory(&mut self, path: &Path) -> Result<(), CoreError> {
        let points = self.registry.decoder()?.borrow().buffer().to_vec();
        let png = render_trajectory_png(&points, &PlotStyle::default())?;
        fs::write(path, png)?;
        self.note(format!("Trajectory saved to {}", path.display()));
        Ok(())
    }

    pub fn export_attention(&mut self, path: &Path) -> Result<(), CoreError> {
        let heads = nested_attention(self.registry.classifier()?.borrow().attention());
        let head = heads
            .first()
            .ok_or_else(|| CoreError::Render("no attention heads".into()))?;
        let png = render_attention_png(head, &PlotStyle::default())?;
        fs::write(path, png)?;
        self.note(format!("Attention map saved to {}", path.display()));
        Ok(())
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let classifier = self.registry.classifier().ok().map(|c| {
            let c = c.borrow();
            let band_means = c
                .band_powers()
                .iter()
                .map(|(name, values)| {
                    let mean = if values.is_empty() {
                        0.0
                    } else {
                        values.iter().sum::<f64>() / values.len() as f64
                    };
                    (name.clone(), mean)
                })
                .collect();
            ClassifierView {
                state: c.state(),
                classification: c.classification(),
                band_means,
                band_powers: c.band_powers().clone(),
                attention_head: nested_attention(c.attention())
                    .into_iter()
                    .next()
                    .unwrap_or_default(),
                decoded: c.decoded().to_vec(),
                decoder_bridge: c.decoder_bridge(),
                feature_mode: c.feature_mode(),
                ticks: c.ticks(),
            }
        });
        let actions = self.registry.actions().ok().map(|a| {
            let a = a.borrow();
            ActionsView {
                enabled: a.is_enabled(),
                threshold: a.threshold(),
                accumulators: a.accumulators().to_vec(),
                recent: a.recent_triggers().copied().collect(),
            }
        });
        let decoder = self.registry.decoder().ok().map(|d| {
            let d = d.borrow();
            DecoderView {
                model: d.model(),
                trajectory: d.trajectory_type(),
                metrics: d.metrics(),
                points: d.buffer().to_vec(),
                movement_requests: d.movement_requests(),
                last_features: d.last_features(),
            }
        });
        let device = self.registry.device().ok().map(|d| {
            let d = d.borrow();
            DeviceView {
                connected: d.is_connected(),
                recording_secs: d.recording_secs(),
                battery_pct: d.battery_pct(),
                storage_pct: d.storage_pct(),
                signal_quality: d.signal_quality(),
                electrodes: d.electrodes().to_vec(),
                impedance_check: d.impedance_check(),
            }
        });
        let language = self.registry.language().ok().map(|l| {
            let l = l.borrow();
            let history: Vec<HistoryEntry> = l.history().cloned().collect();
            let skip = history.len().saturating_sub(HISTORY_IN_SNAPSHOT);
            LanguageView {
                active: l.is_active(),
                connection: l.connection().label().to_owned(),
                guidance: l.guidance(),
                parameters: l.guidance_parameters(),
                history: history.into_iter().skip(skip).collect(),
                last_generation: self.last_generation.clone(),
            }
        });
        DashboardSnapshot {
            now: self.now(),
            wired: self.is_wired(),
            bus_faults: self.bus.fault_count(),
            classifier,
            actions,
            decoder,
            device,
            language,
            activity: self.activity.iter().cloned().collect(),
        }
    }
}

// ── Engine thread ───────────────────────────────────────

/// Runs the dashboard on its own thread, draining GUI commands and streaming snapshots back.
pub fn spawn_thread(
    config: DashboardConfig,
    tx: Sender<EngineMessage>,
    rx_cmd: Receiver<GuiCommand>,
) -> thread::JoinHandle<anyhow::Result<()>> {
    thread::spawn(move || run_loop(config, tx, rx_cmd).context("dashboard engine stopped"))
}

fn run_loop(
    config: DashboardConfig,
    tx: Sender<EngineMessage>,
    rx_cmd: Receiver<GuiCommand>,
) -> anyhow::Result<()> {
    config
        .validate()
        .context("refusing to start with an invalid configuration")?;
    let started = Instant::now();
    let mut dashboard = Dashboard::new(config);
    tx.send(EngineMessage::Log("Dashboard engine ready.".to_owned()))
        .ok();
    let mut last_snapshot = Instant::now();

    loop {
        // 1. commands
        loop {
            match rx_cmd.try_recv() {
                Ok(GuiCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                    log::info!("Dashboard engine shutting down");
                    return Ok(());
                }
                Ok(command) => {
                    if let Err(err) = dashboard.handle_command(command) {
                        log::warn!("{err}");
                        tx.send(EngineMessage::Log(err.to_string())).ok();
                    }
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        // 2. timers
        let now = started.elapsed().as_millis() as Millis;
        dashboard.advance(now);

        // 3. snapshot (throttled)
        if last_snapshot.elapsed() >= SNAPSHOT_EVERY {
            last_snapshot = Instant::now();
            if tx
                .send(EngineMessage::Snapshot(Box::new(dashboard.snapshot())))
                .is_err()
            {
                return Ok(());
            }
        }
        thread::sleep(IDLE_SLEEP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleToggles;
    use crate::llm_bridge::ConnectionStatus;
    use crate::types::ActionName;

    fn seeded() -> DashboardConfig {
        DashboardConfig {
            seed: Some(42),
            ..DashboardConfig::default()
        }
    }

    #[test]
    fn wiring_waits_for_the_startup_delay() {
        let mut d = Dashboard::new(seeded());
        d.advance(999);
        assert!(!d.is_wired());
        d.advance(1000);
        assert!(d.is_wired());
        // decoder:ready -> processor:decoder-ready turns the bridge on
        let snapshot = d.snapshot();
        assert!(snapshot.classifier.map(|c| c.decoder_bridge).unwrap_or(false));
    }

    #[test]
    fn classifier_ticks_only_while_started() {
        let mut d = Dashboard::new(seeded());
        d.advance(1000);
        d.advance(3000);
        assert_eq!(d.snapshot().classifier.unwrap().ticks, 0);
        d.handle_command(GuiCommand::StartClassifier).unwrap();
        d.handle_command(GuiCommand::StartClassifier).unwrap();
        d.advance(5000);
        assert_eq!(d.snapshot().classifier.unwrap().ticks, 4);
        d.handle_command(GuiCommand::StopClassifier).unwrap();
        d.advance(9000);
        assert_eq!(d.snapshot().classifier.unwrap().ticks, 4);
    }

    #[test]
    fn forced_class_flows_through_the_bus() {
        let mut d = Dashboard::new(seeded());
        d.advance(1000);
        d.handle_command(GuiCommand::ForceClass(MotorClass::RightHand, 0.9))
            .unwrap();
        let snapshot = d.snapshot();
        let actions = snapshot.actions.unwrap();
        let navigate = actions
            .accumulators
            .iter()
            .find(|a| a.name == ActionName::Navigate)
            .unwrap();
        assert!(navigate.confidence >= 0.9 && navigate.active());
        assert_eq!(actions.recent.len(), 1);
        assert_eq!(snapshot.decoder.unwrap().movement_requests, 1);
        assert_eq!(
            snapshot.language.unwrap().guidance.map(|g| g.class),
            Some(MotorClass::RightHand)
        );
    }

    #[test]
    fn impedance_check_runs_on_the_timer() {
        let mut d = Dashboard::new(seeded());
        d.handle_command(GuiCommand::RunImpedanceCheck).unwrap();
        d.advance(1000);
        d.advance(1900);
        let device = d.snapshot().device.unwrap();
        assert!(matches!(device.impedance_check, ImpedanceCheck::Running { .. }));
        d.advance(2000);
        let device = d.snapshot().device.unwrap();
        assert_eq!(device.impedance_check, ImpedanceCheck::Completed);
        for e in &device.electrodes {
            assert!((5.0..=40.0).contains(&e.impedance_kohm()));
        }
    }

    #[test]
    fn device_toggle_freezes_recording_time() {
        let mut d = Dashboard::new(seeded());
        d.advance(3000);
        assert_eq!(d.snapshot().device.unwrap().recording_secs, 3);
        d.handle_command(GuiCommand::ToggleDevice).unwrap();
        d.advance(6000);
        assert_eq!(d.snapshot().device.unwrap().recording_secs, 3);
        d.handle_command(GuiCommand::ToggleDevice).unwrap();
        d.advance(8000);
        assert_eq!(d.snapshot().device.unwrap().recording_secs, 5);
    }

    #[test]
    fn handshake_answered_once_wired_and_times_out_before() {
        let mut d = Dashboard::new(seeded());
        d.handle_command(GuiCommand::ConnectLanguageBridge).unwrap();
        d.advance(1999);
        assert_eq!(d.snapshot().language.unwrap().connection, "pending");
        d.advance(2000);
        let language = d.registry().language().unwrap();
        assert_eq!(*language.borrow().connection(), ConnectionStatus::TimedOut);
        assert_eq!(d.bus().listener_count(Topic::ConnectionResponse), 0);

        d.handle_command(GuiCommand::ConnectLanguageBridge).unwrap();
        assert_eq!(*language.borrow().connection(), ConnectionStatus::Standby);
        d.handle_command(GuiCommand::StartClassifier).unwrap();
        d.handle_command(GuiCommand::ConnectLanguageBridge).unwrap();
        assert_eq!(*language.borrow().connection(), ConnectionStatus::Connected);
    }

    #[test]
    fn generation_and_rewire_commands() {
        let mut d = Dashboard::new(seeded());
        d.advance(1000);
        assert!(matches!(
            d.handle_command(GuiCommand::Generate("hello".into())),
            Err(CoreError::Unavailable(_))
        ));
        d.handle_command(GuiCommand::SetLanguageBridgeActive(true))
            .unwrap();
        d.handle_command(GuiCommand::Generate("hello".into()))
            .unwrap();
        assert!(d.snapshot().language.unwrap().last_generation.is_some());

        d.handle_command(GuiCommand::Rewire).unwrap();
        d.handle_command(GuiCommand::ForceClass(MotorClass::Feet, 0.9))
            .unwrap();
        assert_eq!(d.snapshot().decoder.unwrap().movement_requests, 1);
    }

    #[test]
    fn disabled_modules_degrade_gracefully() {
        let config = DashboardConfig {
            modules: ModuleToggles {
                decoder: false,
                language: false,
                ..ModuleToggles::default()
            },
            ..seeded()
        };
        let mut d = Dashboard::new(config);
        let report = d.finish_registration();
        assert_eq!(report.skipped, vec!["decoder", "language"]);
        assert!(matches!(
            d.handle_command(GuiCommand::SetTrajectoryType(TrajectoryType::Reaching)),
            Err(CoreError::MissingCollaborator("decoder"))
        ));
        d.handle_command(GuiCommand::ForceClass(MotorClass::Tongue, 0.95))
            .unwrap();
        let snapshot = d.snapshot();
        assert!(snapshot.decoder.is_none() && snapshot.language.is_none());
        assert_eq!(snapshot.bus_faults, 0);
    }

    #[test]
    fn trajectory_switch_regenerates_the_buffer() {
        let mut d = Dashboard::new(seeded());
        d.advance(1500);
        d.handle_command(GuiCommand::SetTrajectoryType(TrajectoryType::Reaching))
            .unwrap();
        let decoder = d.snapshot().decoder.unwrap();
        assert_eq!(decoder.points.len(), 96);
        assert!(decoder.points.iter().all(|p| p.target.is_some()));
        assert!(decoder.points.iter().all(|p| p.timestamp_ms <= 1500));

        d.advance(1600);
        let points = d.snapshot().decoder.unwrap().points;
        assert!(points.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
        let latest = points.last().unwrap();
        assert_eq!(latest.timestamp_ms, 1600);
        assert_ne!(latest.velocity_actual, (0.0, 0.0));
    }

    #[test]
    fn snapshot_serializes() {
        let mut d = Dashboard::new(seeded());
        d.advance(1500);
        let json = serde_json::to_value(d.snapshot()).unwrap();
        assert_eq!(json["wired"], true);
        assert_eq!(json["decoder"]["trajectory"], "circular");

        let snapshot = d.snapshot();
        let device = snapshot.device.as_ref().unwrap();
        for (i, electrode) in device.electrodes.iter().enumerate() {
            let status = serde_json::to_value(electrode.status()).unwrap();
            assert_eq!(json["device"]["electrodes"][i]["status"], status);
        }
        let actions = snapshot.actions.as_ref().unwrap();
        for (i, acc) in actions.accumulators.iter().enumerate() {
            assert_eq!(json["actions"]["accumulators"][i]["active"], acc.active());
        }
    }
}
