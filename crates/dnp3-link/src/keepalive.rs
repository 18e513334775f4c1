//! Link-status keepalive scheduling.
//!
//! With a nonzero period configured, each session probes its peer with
//! REQUEST_LINK_STATUS whenever the channel is open and no other transmission
//! is outstanding. The timer restarts unconditionally on success *and*
//! failure so that one lost probe never disables future probing.

use std::time::{Duration, Instant};

/// Whether a status probe is due, given seconds-equivalent elapsed time.
#[must_use]
pub fn should_probe_at(elapsed: Duration, period: Duration, tx_idle: bool) -> bool {
    tx_idle && elapsed >= period
}

/// Per-session keepalive timer.
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    period: Option<Duration>,
    last: Instant,
}

impl Keepalive {
    /// `period` of zero disables probing entirely.
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period: (period != Duration::ZERO).then_some(period),
            last: now,
        }
    }

    /// Whether a REQUEST_LINK_STATUS probe should be sent now.
    #[must_use]
    pub fn due(&self, now: Instant, tx_idle: bool) -> bool {
        match self.period {
            Some(period) => should_probe_at(now.duration_since(self.last), period, tx_idle),
            None => false,
        }
    }

    /// Restart the timer. Called after every probe outcome, success or not.
    pub fn restart(&mut self, now: Instant) {
        self.last = now;
    }

    /// Next instant a probe could become due, for scheduling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.period.map(|p| self.last + p)
    }
}
