// src/scheduler.rs
//! Cooperative timers on a virtual monotonic clock.
//!
//! The engine thread feeds wall-clock time in; tests feed it by hand. Timers fire in due order
//! (ties broken by creation order) and run to completion, so there is no in-flight work to cancel.

use std::collections::BTreeMap;

use crate::types::Millis;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a timer drives when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerTag {
    ClassifierTick,
    DecoderTick,
    DeviceTick,
    ImpedanceStep,
    StartupWiring,
    HandshakeTimeout,
}

#[derive(Clone, Debug)]
struct Timer {
    tag: TimerTag,
    due: Millis,
    interval: Option<Millis>,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    now: Millis,
    next_id: u64,
    timers: BTreeMap<TimerId, Timer>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    /// Periodic timer; first fires one interval from now.
    pub fn every(&mut self, interval: Millis, tag: TimerTag) -> TimerId {
        let interval = interval.max(1);
        self.insert(Timer {
            tag,
            due: self.now + interval,
            interval: Some(interval),
        })
    }

    /// One-shot timer.
    pub fn after(&mut self, delay: Millis, tag: TimerTag) -> TimerId {
        self.insert(Timer {
            tag,
            due: self.now + delay,
            interval: None,
        })
    }

    fn insert(&mut self, timer: Timer) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.insert(id, timer);
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// Pops the earliest timer due at or before `until`, moving the clock to its due time.
    /// Periodic timers are re-armed before returning.
    pub fn next_due(&mut self, until: Millis) -> Option<(TimerId, TimerTag)> {
        let (id, due) = self
            .timers
            .iter()
            .filter(|(_, t)| t.due <= until)
            .min_by_key(|(id, t)| (t.due, **id))
            .map(|(id, t)| (*id, t.due))?;
        self.now = self.now.max(due);
        let timer = self.timers.get_mut(&id)?;
        let tag = timer.tag;
        match timer.interval {
            Some(interval) => timer.due = due + interval,
            None => {
                self.timers.remove(&id);
            }
        }
        Some((id, tag))
    }

    /// Moves the clock forward once every due timer has been drained.
    pub fn settle(&mut self, until: Millis) {
        self.now = self.now.max(until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(s: &mut Scheduler, until: Millis) -> Vec<(Millis, TimerTag)> {
        let mut fired = Vec::new();
        while let Some((_, tag)) = s.next_due(until) {
            fired.push((s.now(), tag));
        }
        s.settle(until);
        fired
    }

    #[test]
    fn periodic_timers_catch_up_in_due_order() {
        let mut s = Scheduler::new();
        s.every(500, TimerTag::ClassifierTick);
        s.every(300, TimerTag::DecoderTick);
        let fired = drain(&mut s, 1000);
        assert_eq!(
            fired,
            vec![
                (300, TimerTag::DecoderTick),
                (500, TimerTag::ClassifierTick),
                (600, TimerTag::DecoderTick),
                (900, TimerTag::DecoderTick),
                (1000, TimerTag::ClassifierTick),
            ]
        );
        assert_eq!(s.now(), 1000);
    }

    #[test]
    fn one_shot_fires_once_and_cancel_disarms() {
        let mut s = Scheduler::new();
        let wiring = s.after(1000, TimerTag::StartupWiring);
        let timeout = s.after(2000, TimerTag::HandshakeTimeout);
        assert!(s.cancel(timeout));
        assert!(!s.cancel(timeout));
        assert_eq!(drain(&mut s, 5000), vec![(1000, TimerTag::StartupWiring)]);
        assert!(!s.is_armed(wiring));
        assert_eq!(s.armed_count(), 0);
    }

    #[test]
    fn timers_armed_later_start_from_current_time() {
        let mut s = Scheduler::new();
        drain(&mut s, 750);
        s.every(1000, TimerTag::DeviceTick);
        assert!(drain(&mut s, 1500).is_empty());
        assert_eq!(drain(&mut s, 1750), vec![(1750, TimerTag::DeviceTick)]);
    }
}
