//! Beacon schedule: deadline-based, host supplies the clock.

use std::time::{Duration, Instant};

/// Tracks when the next beacon is due. The first beacon is due as soon as the schedule exists.
#[derive(Debug, Clone)]
pub struct BeaconSchedule {
    period: Duration,
    next_tick: Instant,
}

impl BeaconSchedule {
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_tick: now,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Instant at which the next beacon is due.
    pub fn deadline(&self) -> Instant {
        self.next_tick
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_tick
    }

    /// Time left until the next beacon; zero once due.
    pub fn until_due(&self, now: Instant) -> Duration {
        self.next_tick.saturating_duration_since(now)
    }

    /// Record that a beacon went out at `now`; the next one is due a full period later.
    pub fn mark_sent(&mut self, now: Instant) {
        self.next_tick = now + self.period;
    }
}
