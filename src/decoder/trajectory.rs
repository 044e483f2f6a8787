// src/decoder/trajectory.rs
//! Parametric trajectory generators.
//!
//! Circular and figure-8 follow a phase angle that advances every tick. Reaching runs
//! center-out movements to eight radial targets, easing along a logistic progress curve.

use std::f64::consts::PI;

use crate::decoder::buffer::Vec2;
use crate::types::TrajectoryType;

pub const REACH_TARGETS: usize = 8;
pub const POSITION_LIMIT: f64 = 1.2;
const PHASE_STEP: f64 = 0.05;
const PROGRESS_STEP: f64 = 0.05;
const STEPS_PER_REACH: u32 = 20;
const REACH_RADIUS: f64 = 1.0;
const SIGMOID_GAIN: f64 = 12.0;

/// Logistic easing used by the reaching task.
pub fn smooth_progress(progress: f64) -> f64 {
    1.0 / (1.0 + (-SIGMOID_GAIN * (progress - 0.5)).exp())
}

pub fn circular(phase: f64) -> Vec2 {
    (phase.cos(), phase.sin())
}

pub fn figure8(phase: f64) -> Vec2 {
    (phase.sin(), phase.sin() * phase.cos())
}

/// Target `index` sits on the unit circle at `index * 45°`.
pub fn target_position(index: usize) -> Vec2 {
    let angle = (index % REACH_TARGETS) as f64 * 2.0 * PI / REACH_TARGETS as f64;
    (REACH_RADIUS * angle.cos(), REACH_RADIUS * angle.sin())
}

pub fn reaching(target: usize, progress: f64) -> Vec2 {
    let (tx, ty) = target_position(target);
    let s = smooth_progress(progress);
    (tx * s, ty * s)
}

pub fn clamp_position((x, y): Vec2) -> Vec2 {
    (
        x.clamp(-POSITION_LIMIT, POSITION_LIMIT),
        y.clamp(-POSITION_LIMIT, POSITION_LIMIT),
    )
}

/// One generated sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub position: Vec2,
    pub target: Option<u8>,
    /// Reaching progress in `[0, 1]`; `None` for the periodic generators.
    pub progress: Option<f64>,
}

/// Live generator state for one trajectory type.
#[derive(Clone, Debug)]
pub struct TrajectoryGenerator {
    kind: TrajectoryType,
    phase: f64,
    target: usize,
    reach_step: u32,
}

impl TrajectoryGenerator {
    pub fn new(kind: TrajectoryType) -> Self {
        Self {
            kind,
            phase: 0.0,
            target: 0,
            reach_step: 0,
        }
    }

    pub fn kind(&self) -> TrajectoryType {
        self.kind
    }

    /// Advances one tick and returns the new position.
    pub fn step(&mut self) -> Sample {
        match self.kind {
            TrajectoryType::Circular | TrajectoryType::Figure8 => {
                self.phase = (self.phase + PHASE_STEP) % (2.0 * PI);
                self.periodic_sample(self.phase)
            }
            TrajectoryType::Reaching => {
                self.reach_step += 1;
                if self.reach_step > STEPS_PER_REACH {
                    self.reach_step = 0;
                    self.target = (self.target + 1) % REACH_TARGETS;
                }
                let progress = self.reach_step as f64 * PROGRESS_STEP;
                reach_sample(self.target, progress)
            }
        }
    }

    fn periodic_sample(&self, phase: f64) -> Sample {
        let position = match self.kind {
            TrajectoryType::Figure8 => figure8(phase),
            _ => circular(phase),
        };
        Sample {
            position: clamp_position(position),
            target: None,
            progress: None,
        }
    }

    /// A full buffer's worth of samples; resets the live state to follow on from the end.
    ///
    /// Periodic types are spaced by the live phase step, so the first tick after regeneration
    /// continues at the same speed. Reaching yields one segment per target, `capacity / 8`
    /// points each.
    pub fn regenerate(&mut self, capacity: usize) -> Vec<Sample> {
        match self.kind {
            TrajectoryType::Circular | TrajectoryType::Figure8 => {
                let phase_at = |i: usize| (i as f64 * PHASE_STEP) % (2.0 * PI);
                let samples: Vec<Sample> = (0..capacity)
                    .map(|i| self.periodic_sample(phase_at(i)))
                    .collect();
                self.phase = phase_at(capacity.saturating_sub(1));
                samples
            }
            TrajectoryType::Reaching => {
                let per_target = capacity / REACH_TARGETS;
                let mut samples = Vec::with_capacity(per_target * REACH_TARGETS);
                for target in 0..REACH_TARGETS {
                    for k in 0..per_target {
                        let progress = if per_target > 1 {
                            k as f64 / (per_target - 1) as f64
                        } else {
                            1.0
                        };
                        samples.push(reach_sample(target, progress));
                    }
                }
                self.target = 0;
                self.reach_step = 0;
                samples
            }
        }
    }
}

fn reach_sample(target: usize, progress: f64) -> Sample {
    Sample {
        position: clamp_position(reaching(target, progress)),
        target: Some(target as u8),
        progress: Some(progress.clamp(0.0, 1.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smooth_progress_is_a_centered_logistic() {
        assert!((smooth_progress(0.5) - 0.5).abs() < 1e-12);
        assert!(smooth_progress(0.0) < 0.01);
        assert!(smooth_progress(1.0) > 0.99);
    }

    #[test]
    fn targets_are_spaced_by_45_degrees() {
        let (x, y) = target_position(2);
        assert!(x.abs() < 1e-12 && (y - 1.0).abs() < 1e-12);
        let (x, y) = target_position(1);
        assert!((x - y).abs() < 1e-12);
        assert_eq!(target_position(8), target_position(0));
    }

    #[test]
    fn circular_stays_on_the_unit_circle() {
        let mut generator = TrajectoryGenerator::new(TrajectoryType::Circular);
        for _ in 0..300 {
            let (x, y) = generator.step().position;
            assert!(((x * x + y * y).sqrt() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn reaching_moves_on_to_the_next_target() {
        let mut generator = TrajectoryGenerator::new(TrajectoryType::Reaching);
        let first: Vec<Option<u8>> = (0..20).map(|_| generator.step().target).collect();
        assert!(first.iter().all(|t| *t == Some(0)));
        let wrapped = generator.step();
        assert_eq!(wrapped.target, Some(1));
        assert_eq!(wrapped.progress, Some(0.0));
    }

    #[test]
    fn reaching_regeneration_has_one_segment_per_target() {
        let mut generator = TrajectoryGenerator::new(TrajectoryType::Reaching);
        let samples = generator.regenerate(100);
        assert_eq!(samples.len(), 96);
        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(sample.target, Some((i / 12) as u8));
        }
    }

    #[test]
    fn live_step_continues_the_regenerated_spacing() {
        let distance = |a: Vec2, b: Vec2| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
        let mut generator = TrajectoryGenerator::new(TrajectoryType::Circular);
        let samples = generator.regenerate(100);
        let chord = 2.0 * (PHASE_STEP / 2.0).sin();
        for pair in samples.windows(2) {
            assert!((distance(pair[0].position, pair[1].position) - chord).abs() < 1e-9);
        }
        let last = samples[samples.len() - 1].position;
        let next = generator.step().position;
        assert!((distance(last, next) - chord).abs() < 1e-9);
    }

    #[test]
    fn figure8_stays_in_bounds() {
        let mut generator = TrajectoryGenerator::new(TrajectoryType::Figure8);
        for sample in generator.regenerate(100) {
            let (x, y) = sample.position;
            assert!(x.abs() <= 1.0 && y.abs() <= 0.5 + 1e-12);
        }
    }
}
