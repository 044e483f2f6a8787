// src/main.rs
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
use std::env;
use std::path::PathBuf;

use anyhow::Context;
use eframe::egui;

use neurobridge::gui::DashboardApp;
use neurobridge::DashboardConfig;

const CONFIG_ENV: &str = "NEUROBRIDGE_CONFIG";

// First CLI argument wins over the environment; neither means defaults.
fn load_config() -> anyhow::Result<DashboardConfig> {
    let path = env::args()
        .nth(1)
        .or_else(|| env::var(CONFIG_ENV).ok())
        .map(PathBuf::from);
    match path {
        Some(path) => DashboardConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(DashboardConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = load_config()?;
    log::info!("Starting dashboard (seed: {:?})", config.seed);

    let viewport = egui::ViewportBuilder::default()
        .with_inner_size([1463.0, 915.0])
        .with_min_inner_size([1200.0, 760.0])
        .with_title("Neurobridge");
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "Neurobridge",
        options,
        Box::new(|_cc| Box::new(DashboardApp::new(config))),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))
}
