// src/drivers/mod.rs
pub mod fft;
pub mod plot;
pub mod source;

pub use fft::BandPowerEstimator;
pub use plot::{render_attention_png, render_trajectory_png, PlotStyle};
pub use source::{ManualSource, SignalSource, SimulatedSource, SpectralSource};
