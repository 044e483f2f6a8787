// src/decoder/buffer.rs
use std::collections::VecDeque;

use serde::Serialize;

pub type Vec2 = (f64, f64);

/// Hard upper bound on the trajectory history.
pub const MAX_CAPACITY: usize = 100;

/// One decoded sample: where the cursor was, where the decoder thought it was.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryPoint {
    pub actual: Vec2,
    pub predicted: Vec2,
    pub velocity_actual: Vec2,
    pub velocity_predicted: Vec2,
    /// Runtime clock in ms; a window regenerated early in a session starts before zero.
    pub timestamp_ms: i64,
    /// Reaching target index; `None` for the periodic generators.
    pub target: Option<u8>,
}

impl TrajectoryPoint {
    pub fn error(&self) -> f64 {
        let dx = self.predicted.0 - self.actual.0;
        let dy = self.predicted.1 - self.actual.1;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Fixed-capacity FIFO of trajectory points; the oldest point is evicted on overflow.
/// Capacity is clamped to `1..=MAX_CAPACITY`.
#[derive(Clone, Debug)]
pub struct TrajectoryBuffer {
    points: VecDeque<TrajectoryPoint>,
    capacity: usize,
}

impl TrajectoryBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, point: TrajectoryPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn latest(&self) -> Option<&TrajectoryPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrajectoryPoint> {
        self.points.iter()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Drops everything and refills from `points`, keeping the newest `capacity`.
    pub fn replace(&mut self, points: impl IntoIterator<Item = TrajectoryPoint>) {
        self.points.clear();
        for point in points {
            self.push(point);
        }
    }

    pub fn to_vec(&self) -> Vec<TrajectoryPoint> {
        self.points.iter().copied().collect()
    }
}
