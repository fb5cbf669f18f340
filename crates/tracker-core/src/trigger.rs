//! Debounce that decides whether a check cycle is due.
//!
//! `CheckCycleState` lives in memory only and is owned by whoever drives the
//! cycles (the background worker). After a restart `last_check` is unset, so
//! the first trigger always fires; cycles are idempotent, which makes that
//! harmless.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// True when no cycle has completed yet or at least `interval` has passed
/// since the last completed one.
pub fn should_run(
    now: DateTime<Utc>,
    last_check: Option<DateTime<Utc>>,
    interval: Duration,
) -> bool {
    match last_check {
        None => true,
        Some(last) => match (now - last).to_std() {
            Ok(elapsed) => elapsed >= interval,
            // last_check in the future: the clock went backwards. Wait it out.
            Err(_) => false,
        },
    }
}

#[derive(Debug)]
pub struct CheckCycleState {
    interval: Duration,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

impl CheckCycleState {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_check: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        *self.last_check.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Side-effect free; several callers may see `true` at once.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        should_run(now, self.last_check(), self.interval)
    }

    /// Call only after a cycle completed. Never moves `last_check` backwards.
    pub fn record_success(&self, at: DateTime<Utc>) {
        let mut last = self.last_check.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if prev >= at => {}
            _ => *last = Some(at),
        }
    }
}
