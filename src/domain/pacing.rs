//! Capture scheduling.
//!
//! The next capture is due one interval after the previous *scheduled* time, not
//! after the moment the camera returned, so slow captures do not make the average
//! interval drift.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Pacer {
    /// The first capture is due immediately.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Takes effect from the next scheduled capture on.
    pub fn set_interval(&mut self, interval: Duration) {
        if let Some(due) = self.next_due {
            self.next_due = Some(due - self.interval + interval);
        }
        self.interval = interval;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.map_or(true, |due| now >= due)
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Record a capture that happened at `now` and schedule the next one.
    ///
    /// If more than a whole interval was missed (camera stall, suspended process),
    /// the schedule restarts from `now` instead of firing a burst of captures.
    pub fn record_capture(&mut self, now: Instant) {
        let scheduled = self.next_due.unwrap_or(now);
        let next = scheduled + self.interval;
        self.next_due = Some(if next <= now { now + self.interval } else { next });
    }
}
