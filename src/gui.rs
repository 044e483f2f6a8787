// src/gui.rs
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};

use eframe::egui;
use egui::{Color32, Rounding, Stroke, Vec2};
use egui_plot::{Bar, BarChart, Line, Plot, PlotPoints, Points};

use crate::config::DashboardConfig;
use crate::device::ElectrodeQuality;
use crate::engine::{self, DashboardSnapshot};
use crate::types::*;

const CYAN: Color32 = Color32::from_rgb(0, 255, 255);
const MAGENTA: Color32 = Color32::from_rgb(255, 0, 255);
const LOG_LINES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tab {
    Classifier,
    Decoder,
    Device,
    Language,
}

pub struct DashboardApp {
    selected_tab: Tab,
    snapshot: Option<DashboardSnapshot>,
    force_class: MotorClass,
    force_confidence: f64,
    threshold: f64,
    prompt: String,
    export_dir: String,
    log_messages: Vec<String>,

    rx: Receiver<EngineMessage>,
    tx_cmd: Sender<GuiCommand>,
}

impl DashboardApp {
    pub fn new(config: DashboardConfig) -> Self {
        let (tx, rx) = channel();
        let (tx_cmd, rx_cmd) = channel();
        let threshold = config.actions.trigger_threshold;

        // engine runs until Shutdown or until we drop the sender
        engine::spawn_thread(config, tx, rx_cmd);

        Self {
            selected_tab: Tab::Classifier,
            snapshot: None,
            force_class: MotorClass::RightHand,
            force_confidence: 0.9,
            threshold,
            prompt: String::new(),
            export_dir: ".".to_owned(),
            log_messages: vec!["Neurobridge dashboard ready.".to_owned()],
            rx,
            tx_cmd,
        }
    }

    fn log(&mut self, msg: &str) {
        self.log_messages.push(format!("> {msg}"));
        if self.log_messages.len() > LOG_LINES {
            self.log_messages.remove(0);
        }
    }

    fn send(&self, command: GuiCommand) {
        if self.tx_cmd.send(command).is_err() {
            log::warn!("engine thread is gone; command dropped");
        }
    }

    fn side_panel(&mut self, ui: &mut egui::Ui) {
        ui.add_space(10.0);
        ui.heading("Neurobridge");
        ui.label("BCI coordination dashboard");
        ui.separator();

        let Some(snap) = self.snapshot.clone() else {
            ui.label("Waiting for engine...");
            return;
        };
        let wiring = if snap.wired { "wired" } else { "starting" };
        ui.label(format!("t = {:.1}s  ({wiring})", snap.now as f64 / 1000.0));
        if snap.bus_faults > 0 {
            ui.label(
                egui::RichText::new(format!("{} handler fault(s)", snap.bus_faults))
                    .color(Color32::YELLOW)
                    .small(),
            );
        }
        if ui.button("REWIRE").clicked() {
            self.send(GuiCommand::Rewire);
        }

        ui.add_space(10.0);
        if let Some(classifier) = &snap.classifier {
            ui.label("CLASSIFIER");
            let active = classifier.state == crate::classifier::ClassifierState::Active;
            ui.horizontal(|ui| {
                let btn = if active { "STOP" } else { "START" };
                if ui.button(btn).clicked() {
                    self.send(if active {
                        GuiCommand::StopClassifier
                    } else {
                        GuiCommand::StartClassifier
                    });
                }
                if ui.button("RESET").clicked() {
                    self.send(GuiCommand::ResetClassifier);
                }
            });
            let c = classifier.classification;
            ui.label(
                egui::RichText::new(format!("{} ({:.0}%)", c.class, c.confidence * 100.0))
                    .strong()
                    .color(CYAN),
            );

            let mut bridge = classifier.decoder_bridge;
            if ui.checkbox(&mut bridge, "Decoder bridge").changed() {
                self.send(GuiCommand::SetDecoderBridge(bridge));
            }
            let mut mode = classifier.feature_mode;
            ui.horizontal(|ui| {
                ui.selectable_value(&mut mode, FeatureMode::Transformer, "TRANSFORMER");
                ui.selectable_value(&mut mode, FeatureMode::Traditional, "TRADITIONAL");
            });
            if mode != classifier.feature_mode {
                self.send(GuiCommand::SetFeatureMode(mode));
            }

            egui::ComboBox::from_label("Simulate")
                .selected_text(self.force_class.label())
                .show_ui(ui, |ui| {
                    for class in MotorClass::ALL {
                        ui.selectable_value(&mut self.force_class, class, class.label());
                    }
                });
            ui.add(egui::Slider::new(&mut self.force_confidence, 0.0..=1.0).text("conf"));
            if ui.button("SEND CLASS").clicked() {
                self.send(GuiCommand::ForceClass(self.force_class, self.force_confidence));
            }
        }

        ui.add_space(10.0);
        if let Some(actions) = &snap.actions {
            ui.separator();
            ui.label("ACTIONS");
            let mut enabled = actions.enabled;
            if ui.checkbox(&mut enabled, "Enabled").changed() {
                self.send(GuiCommand::SetActionsEnabled(enabled));
            }
            if ui
                .add(egui::Slider::new(&mut self.threshold, 0.0..=1.0).text("threshold"))
                .drag_released()
            {
                self.send(GuiCommand::SetTriggerThreshold(self.threshold));
            }
            for acc in &actions.accumulators {
                let label = match acc.direction {
                    Some(dir) => format!("{} {}", acc.name.as_str(), dir.as_str()),
                    None => acc.name.as_str().to_owned(),
                };
                let bar = egui::ProgressBar::new(acc.confidence as f32).text(label);
                let bar = if acc.triggered { bar.fill(Color32::GREEN) } else { bar };
                ui.add(bar);
            }
            if let Some(last) = actions.recent.last() {
                ui.label(egui::RichText::new(format!("Last: {}", last.describe())).small());
            }
        }

        ui.add_space(10.0);
        ui.separator();
        egui::ScrollArea::vertical().max_height(120.0).show(ui, |ui| {
            for m in &snap.activity {
                ui.monospace(m);
            }
            for m in &self.log_messages {
                ui.monospace(m);
            }
        });
    }

    fn classifier_tab(&self, ui: &mut egui::Ui, snap: &DashboardSnapshot) {
        let Some(classifier) = &snap.classifier else {
            ui.label("Classifier module disabled.");
            return;
        };
        ui.label(format!("Ticks: {}", classifier.ticks));

        ui.label("BAND POWER (mean across electrodes)");
        let bars: Vec<Bar> = classifier
            .band_means
            .iter()
            .enumerate()
            .map(|(i, (name, value))| Bar::new(i as f64, *value).name(name))
            .collect();
        Plot::new("band_power")
            .view_aspect(4.0)
            .include_y(0.0)
            .show(ui, |plot_ui| {
                plot_ui.bar_chart(BarChart::new(bars).color(CYAN));
            });

        ui.label("DECODED OUTPUT");
        Plot::new("decoded")
            .view_aspect(3.0)
            .include_y(0.0)
            .include_y(1.0)
            .show(ui, |plot_ui| {
                let colors = [CYAN, MAGENTA, Color32::YELLOW, Color32::GREEN, Color32::GRAY];
                for class in MotorClass::ALL {
                    let points: Vec<[f64; 2]> = classifier
                        .decoded
                        .iter()
                        .map(|p| [p.time_ms as f64 / 1000.0, p.activations[class.index()]])
                        .collect();
                    plot_ui.line(
                        Line::new(PlotPoints::new(points))
                            .name(class.label())
                            .color(colors[class.index()]),
                    );
                }
            });

        ui.label("ATTENTION (head 0)");
        draw_heat_map(ui, &classifier.attention_head);
    }

    fn decoder_tab(&mut self, ui: &mut egui::Ui, snap: &DashboardSnapshot) {
        let Some(decoder) = &snap.decoder else {
            ui.label("Decoder module disabled.");
            return;
        };
        ui.horizontal(|ui| {
            for model in DecoderModel::ALL {
                if ui
                    .selectable_label(decoder.model == model, model.as_str().to_uppercase())
                    .clicked()
                {
                    self.send(GuiCommand::SetDecoderModel(model));
                }
            }
            ui.separator();
            for kind in TrajectoryType::ALL {
                if ui
                    .selectable_label(decoder.trajectory == kind, kind.as_str())
                    .clicked()
                {
                    self.send(GuiCommand::SetTrajectoryType(kind));
                }
            }
        });

        let m = decoder.metrics;
        ui.label(format!(
            "accuracy {:.1}%  mse {:.4}  r2 {:.3}  corr {:.3}  {:.1} ms  {:.1} bits/min",
            m.accuracy * 100.0,
            m.mse,
            m.r2,
            m.correlation,
            m.decode_time_ms,
            m.bitrate
        ));
        ui.label(format!("Movement requests: {}", decoder.movement_requests));

        let actual: Vec<[f64; 2]> = decoder.points.iter().map(|p| [p.actual.0, p.actual.1]).collect();
        let predicted: Vec<[f64; 2]> = decoder
            .points
            .iter()
            .map(|p| [p.predicted.0, p.predicted.1])
            .collect();
        let cursor = decoder.points.last().map(|p| [p.predicted.0, p.predicted.1]);
        Plot::new("trajectory")
            .data_aspect(1.0)
            .view_aspect(1.5)
            .include_x(-1.2)
            .include_x(1.2)
            .include_y(-1.2)
            .include_y(1.2)
            .show(ui, |plot_ui| {
                plot_ui.line(Line::new(PlotPoints::new(actual)).name("actual").color(CYAN));
                plot_ui.line(
                    Line::new(PlotPoints::new(predicted))
                        .name("predicted")
                        .color(MAGENTA),
                );
                if let Some(cursor) = cursor {
                    plot_ui.points(Points::new(vec![cursor]).radius(5.0).color(Color32::WHITE));
                }
            });

        let mut export = None;
        ui.horizontal(|ui| {
            ui.label("Export to");
            ui.text_edit_singleline(&mut self.export_dir);
            let dir = PathBuf::from(&self.export_dir);
            if ui.button("TRAJECTORY PNG").clicked() {
                export = Some(GuiCommand::ExportTrajectory(dir.join("trajectory.png")));
            }
            if ui.button("ATTENTION PNG").clicked() {
                export = Some(GuiCommand::ExportAttention(dir.join("attention.png")));
            }
        });
        if let Some(command) = export {
            self.send(command);
        }
    }

    fn device_tab(&self, ui: &mut egui::Ui, snap: &DashboardSnapshot) {
        let Some(device) = &snap.device else {
            ui.label("Device module disabled.");
            return;
        };
        ui.horizontal(|ui| {
            let btn = if device.connected { "DISCONNECT" } else { "CONNECT" };
            if ui.button(btn).clicked() {
                self.send(GuiCommand::ToggleDevice);
            }
            let running = matches!(
                device.impedance_check,
                crate::device::ImpedanceCheck::Running { .. }
            );
            if ui
                .add_enabled(!running, egui::Button::new("IMPEDANCE CHECK"))
                .clicked()
            {
                self.send(GuiCommand::RunImpedanceCheck);
            }
        });
        if let crate::device::ImpedanceCheck::Running { progress_pct } = device.impedance_check {
            ui.add(egui::ProgressBar::new(progress_pct as f32 / 100.0).show_percentage());
        }

        let secs = device.recording_secs;
        ui.label(format!(
            "Recording {:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        ));
        ui.add(egui::ProgressBar::new(device.battery_pct as f32 / 100.0).text(format!(
            "battery {:.0}%",
            device.battery_pct
        )));
        ui.add(egui::ProgressBar::new(device.storage_pct as f32 / 100.0).text(format!(
            "storage {:.1}%",
            device.storage_pct
        )));
        ui.label(format!("Signal quality {:.0}%", device.signal_quality));

        ui.separator();
        egui::Grid::new("electrodes").striped(true).show(ui, |ui| {
            for e in &device.electrodes {
                let color = match e.status() {
                    ElectrodeQuality::Good => Color32::GREEN,
                    ElectrodeQuality::Moderate => Color32::YELLOW,
                    ElectrodeQuality::Poor => Color32::RED,
                };
                ui.label(e.name());
                ui.label(format!("{:.1} kΩ", e.impedance_kohm()));
                ui.label(egui::RichText::new(e.status().as_str()).color(color));
                ui.end_row();
            }
        });
    }

    fn language_tab(&mut self, ui: &mut egui::Ui, snap: &DashboardSnapshot) {
        let Some(language) = &snap.language else {
            ui.label("Language bridge disabled.");
            return;
        };
        ui.horizontal(|ui| {
            let mut active = language.active;
            if ui.checkbox(&mut active, "Active").changed() {
                self.send(GuiCommand::SetLanguageBridgeActive(active));
            }
            if ui.button("CONNECT").clicked() {
                self.send(GuiCommand::ConnectLanguageBridge);
            }
            ui.label(format!("handshake: {}", language.connection));
        });
        if let Some(g) = &language.guidance {
            ui.label(format!("Guidance: {} ({:.0}%)", g.class, g.confidence * 100.0));
        }
        let p = language.parameters;
        ui.label(format!(
            "temperature {:.2}  top_p {:.2}  repetition {:.2}",
            p.temperature, p.top_p, p.repetition_penalty
        ));

        ui.add(egui::TextEdit::multiline(&mut self.prompt).desired_rows(3));
        if ui
            .add_enabled(language.active, egui::Button::new("GENERATE"))
            .clicked()
        {
            self.send(GuiCommand::Generate(self.prompt.clone()));
        }
        if let Some(g) = &language.last_generation {
            ui.separator();
            ui.label(egui::RichText::new(&g.text).color(CYAN));
        }
        ui.separator();
        egui::ScrollArea::vertical().max_height(160.0).show(ui, |ui| {
            for entry in language.history.iter().rev() {
                ui.monospace(format!("{}: {}", entry.prompt, entry.generated));
            }
        });
    }
}

fn draw_heat_map(ui: &mut egui::Ui, head: &[Vec<f64>]) {
    let n = head.len();
    if n == 0 {
        ui.label("no attention yet");
        return;
    }
    let side = 180.0;
    let (response, painter) = ui.allocate_painter(Vec2::splat(side), egui::Sense::hover());
    let rect = response.rect;
    let cell = side / n as f32;
    let peak = head
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(1e-9f64, f64::max);
    for (i, row) in head.iter().enumerate() {
        for (j, w) in row.iter().enumerate() {
            let t = (w / peak).clamp(0.0, 1.0) as f32;
            let color = Color32::from_rgb((40.0 + 215.0 * t) as u8, (20.0 + 120.0 * t) as u8, 60);
            let min = rect.min + Vec2::new(j as f32 * cell, i as f32 * cell);
            painter.rect_filled(
                egui::Rect::from_min_size(min, Vec2::splat(cell)),
                Rounding::same(0.0),
                color,
            );
        }
    }
    painter.rect_stroke(rect, Rounding::same(0.0), Stroke::new(1.0, Color32::from_rgb(60, 60, 60)));
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // keep only the freshest snapshot
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                EngineMessage::Log(s) => self.log(&s),
                EngineMessage::Snapshot(snap) => self.snapshot = Some(*snap),
            }
        }
        ctx.request_repaint();

        let mut visuals = egui::Visuals::dark();
        visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(10, 10, 15);
        ctx.set_visuals(visuals);

        egui::SidePanel::left("L").min_width(300.0).show(ctx, |ui| {
            self.side_panel(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.selectable_value(&mut self.selected_tab, Tab::Classifier, "Classifier");
                ui.selectable_value(&mut self.selected_tab, Tab::Decoder, "Decoder");
                ui.selectable_value(&mut self.selected_tab, Tab::Device, "Device");
                ui.selectable_value(&mut self.selected_tab, Tab::Language, "Language");
            });
            ui.separator();
            let Some(snap) = self.snapshot.clone() else {
                return;
            };
            match self.selected_tab {
                Tab::Classifier => self.classifier_tab(ui, &snap),
                Tab::Decoder => self.decoder_tab(ui, &snap),
                Tab::Device => self.device_tab(ui, &snap),
                Tab::Language => self.language_tab(ui, &snap),
            }
        });
    }
}

impl Drop for DashboardApp {
    fn drop(&mut self) {
        self.tx_cmd.send(GuiCommand::Shutdown).ok();
    }
}
