// src/device.rs
//! Simulated headset status: electrode impedance and signal quality, battery, storage and
//! recording time.
//!
//! Status thresholds follow the usual scalp-electrode rule of thumb:
//! - impedance < 15 kΩ is good
//! - impedance < 20 kΩ is moderate
//! - anything higher is poor

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use crate::bus::{BciStatus, BusEvent};
use crate::config::DeviceConfig;
use crate::types::Millis;

pub const GOOD_BELOW_KOHM: f64 = 15.0;
pub const MODERATE_BELOW_KOHM: f64 = 20.0;
const IMPEDANCE_RANGE_KOHM: (f64, f64) = (5.0, 40.0);
const IMPEDANCE_WALK_KOHM: f64 = 0.5;
const QUALITY_WALK_PCT: f64 = 2.0;
const BATTERY_DRAIN_PROBABILITY: f64 = 0.05;
const STORAGE_GROWTH_PROBABILITY: f64 = 0.1;
const STORAGE_STEP_PCT: f64 = 0.1;
const CHECK_STEP_PCT: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectrodeQuality {
    Good,
    Moderate,
    Poor,
}

impl ElectrodeQuality {
    pub fn from_impedance(kohm: f64) -> Self {
        if kohm < GOOD_BELOW_KOHM {
            Self::Good
        } else if kohm < MODERATE_BELOW_KOHM {
            Self::Moderate
        } else {
            Self::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Moderate => "moderate",
            Self::Poor => "poor",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ElectrodeStatus {
    name: String,
    impedance_kohm: f64,
    signal_quality: f64,
}

impl ElectrodeStatus {
    fn new(name: String, impedance_kohm: f64) -> Self {
        Self {
            name,
            impedance_kohm,
            signal_quality: quality_from_impedance(impedance_kohm),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn impedance_kohm(&self) -> f64 {
        self.impedance_kohm
    }

    pub fn signal_quality(&self) -> f64 {
        self.signal_quality
    }

    /// Derived on every read.
    pub fn status(&self) -> ElectrodeQuality {
        ElectrodeQuality::from_impedance(self.impedance_kohm)
    }
}

impl Serialize for ElectrodeStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ElectrodeStatus", 4)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("impedance_kohm", &self.impedance_kohm)?;
        state.serialize_field("signal_quality", &self.signal_quality)?;
        state.serialize_field("status", &self.status())?;
        state.end()
    }
}

/// Quality implied by a fresh impedance reading.
pub fn quality_from_impedance(kohm: f64) -> f64 {
    (100.0 - (kohm - IMPEDANCE_RANGE_KOHM.0) * 2.0).clamp(0.0, 100.0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ImpedanceCheck {
    Idle,
    Running { progress_pct: u8 },
    Completed,
}

pub struct DeviceMonitor {
    config: DeviceConfig,
    rng: StdRng,
    connected: bool,
    recording_secs: u64,
    battery_pct: f64,
    storage_pct: f64,
    electrodes: Vec<ElectrodeStatus>,
    check: ImpedanceCheck,
}

impl DeviceMonitor {
    pub fn new(config: DeviceConfig, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let electrodes = config
            .electrodes
            .iter()
            .map(|name| ElectrodeStatus::new(name.clone(), rng.gen_range(5.0..25.0)))
            .collect();
        Self {
            connected: config.start_connected,
            rng,
            recording_secs: 0,
            battery_pct: 85.0,
            storage_pct: 23.5,
            electrodes,
            check: ImpedanceCheck::Idle,
            config,
        }
    }

    pub fn tick_ms(&self) -> Millis {
        self.config.tick_ms
    }

    pub fn impedance_step_ms(&self) -> Millis {
        self.config.impedance_step_ms
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn recording_secs(&self) -> u64 {
        self.recording_secs
    }

    pub fn battery_pct(&self) -> f64 {
        self.battery_pct
    }

    pub fn storage_pct(&self) -> f64 {
        self.storage_pct
    }

    pub fn electrodes(&self) -> &[ElectrodeStatus] {
        &self.electrodes
    }

    pub fn impedance_check(&self) -> ImpedanceCheck {
        self.check
    }

    /// Mean quality across electrodes.
    pub fn signal_quality(&self) -> f64 {
        if self.electrodes.is_empty() {
            return 0.0;
        }
        self.electrodes.iter().map(|e| e.signal_quality).sum::<f64>() / self.electrodes.len() as f64
    }

    pub fn status(&self) -> BciStatus {
        BciStatus {
            signal_quality: self.signal_quality(),
            battery_level: self.battery_pct,
            connected: self.connected,
        }
    }

    /// One second of simulated hardware. Nothing moves while disconnected.
    pub fn tick(&mut self) -> Option<BusEvent> {
        if !self.connected {
            return None;
        }
        self.recording_secs += 1;
        if self.rng.gen_bool(BATTERY_DRAIN_PROBABILITY) {
            self.battery_pct = (self.battery_pct - 1.0).max(0.0);
        }
        if self.rng.gen_bool(STORAGE_GROWTH_PROBABILITY) {
            self.storage_pct = (self.storage_pct + STORAGE_STEP_PCT).min(100.0);
        }
        for electrode in self.electrodes.iter_mut() {
            let dz = self.rng.gen_range(-IMPEDANCE_WALK_KOHM..=IMPEDANCE_WALK_KOHM);
            let dq = self.rng.gen_range(-QUALITY_WALK_PCT..=QUALITY_WALK_PCT);
            electrode.impedance_kohm = (electrode.impedance_kohm + dz).clamp(1.0, 50.0);
            electrode.signal_quality = (electrode.signal_quality + dq).clamp(0.0, 100.0);
        }
        Some(BusEvent::BciStatusUpdated(self.status()))
    }

    /// Flips the connection and reports the new status.
    pub fn toggle_connection(&mut self) -> BusEvent {
        self.connected = !self.connected;
        log::info!(
            "Device {}",
            if self.connected { "connected" } else { "disconnected" }
        );
        BusEvent::BciStatusUpdated(self.status())
    }

    /// Returns `false` if a check is already running.
    pub fn start_impedance_check(&mut self) -> bool {
        if matches!(self.check, ImpedanceCheck::Running { .. }) {
            return false;
        }
        self.check = ImpedanceCheck::Running { progress_pct: 0 };
        log::info!("Impedance check started");
        true
    }

    /// Advances a running check by one step; on reaching 100% every electrode is re-measured.
    pub fn step_impedance_check(&mut self) -> ImpedanceCheck {
        let ImpedanceCheck::Running { progress_pct } = self.check else {
            return self.check;
        };
        let progress_pct = progress_pct.saturating_add(CHECK_STEP_PCT).min(100);
        if progress_pct < 100 {
            self.check = ImpedanceCheck::Running { progress_pct };
            return self.check;
        }
        let (low, high) = IMPEDANCE_RANGE_KOHM;
        for electrode in self.electrodes.iter_mut() {
            electrode.impedance_kohm = self.rng.gen_range(low..=high);
            electrode.signal_quality = quality_from_impedance(electrode.impedance_kohm);
        }
        self.check = ImpedanceCheck::Completed;
        let poor = self
            .electrodes
            .iter()
            .filter(|e| e.status() == ElectrodeQuality::Poor)
            .count();
        log::info!("Impedance check complete, {poor} electrode(s) poor");
        self.check
    }

    /// Runs a full check without the timer, returning the number of steps taken.
    pub fn run_impedance_check(&mut self) -> usize {
        self.start_impedance_check();
        let mut steps = 0;
        while matches!(self.check, ImpedanceCheck::Running { .. }) {
            self.step_impedance_check();
            steps += 1;
        }
        steps
    }
}
