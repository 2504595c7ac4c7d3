//! Cooperative scheduler: one thread, two clocks, no preemption.
//!
//! The host drives two events: a per-frame `tick` that also advances
//! simulated time, and a coarser `update`. Work that has to wait is
//! re-registered as a continuation for the next occurrence of one of them,
//! or for a point in simulated time. A continuation is never run in the
//! same pump that scheduled it.
//!
//! # Invariants
//! - Continuations due on the same event run in the order they were scheduled.
//! - Timed continuations fire on the first tick at or after their deadline.
//! - There is no cancellation; a continuation re-checks its own preconditions.

use std::collections::BTreeMap;
use std::time::Duration;

/// When a continuation should run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wake {
    /// On the next `tick`.
    Tick,
    /// On the next `update`.
    Update,
    /// On the first `tick` after this much simulated time has passed.
    After(Duration),
}

impl Wake {
    /// Fractional-second wait, rounded to whole milliseconds.
    pub fn after_secs(secs: f32) -> Self {
        Self::After(Duration::from_millis((secs.max(0.0) * 1000.0).round() as u64))
    }
}

/// Counters describing scheduler activity so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub updates: u64,
    pub pending: usize,
}

/// Queue of continuations of type `T`, released by `tick` and `update`.
#[derive(Debug)]
pub struct Scheduler<T> {
    now: Duration,
    ticks: u64,
    updates: u64,
    on_tick: Vec<T>,
    on_update: Vec<T>,
    /// Keyed by (deadline, sequence) so equal deadlines keep schedule order.
    timers: BTreeMap<(Duration, u64), T>,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            now: Duration::ZERO,
            ticks: 0,
            updates: 0,
            on_tick: Vec::new(),
            on_update: Vec::new(),
            timers: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule(&mut self, wake: Wake, task: T) {
        match wake {
            Wake::Tick => self.on_tick.push(task),
            Wake::Update => self.on_update.push(task),
            Wake::After(delay) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.timers.insert((self.now + delay, seq), task);
            }
        }
    }

    /// Advance simulated time by `dt` and release everything due on this tick.
    pub fn tick(&mut self, dt: Duration) -> Vec<T> {
        self.now += dt;
        self.ticks += 1;
        let mut due = std::mem::take(&mut self.on_tick);
        while let Some(entry) = self.timers.first_entry() {
            if entry.key().0 > self.now {
                break;
            }
            due.push(entry.remove());
        }
        if !due.is_empty() {
            tracing::trace!(tick = self.ticks, due = due.len(), "tick continuations released");
        }
        due
    }

    /// Release everything waiting for the next update.
    pub fn update(&mut self) -> Vec<T> {
        self.updates += 1;
        let due = std::mem::take(&mut self.on_update);
        if !due.is_empty() {
            tracing::trace!(update = self.updates, due = due.len(), "update continuations released");
        }
        due
    }

    pub fn pending(&self) -> usize {
        self.on_tick.len() + self.on_update.len() + self.timers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.ticks,
            updates: self.updates,
            pending: self.pending(),
        }
    }
}
