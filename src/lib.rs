// src/lib.rs
//! Coordination core for a brain-computer-interface dashboard.
//!
//! Five simulated modules (classifier, action engine, movement decoder, device monitor and a
//! language-model bridge) talk over a single-threaded [`bus::EventBus`]; [`glue::Coordinator`]
//! wires them once registration settles and [`engine::Dashboard`] drives everything off a
//! virtual clock.

pub mod actions;
pub mod bus;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod device;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod glue;
pub mod gui;
pub mod llm_bridge;
pub mod registry;
pub mod scheduler;
pub mod types;

pub use config::DashboardConfig;
pub use engine::{Dashboard, DashboardSnapshot};
pub use error::CoreError;
