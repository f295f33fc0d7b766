//! Timestamp source abstraction.
//!
//! All TTL and window arithmetic in the crate goes through a single [`Clock`]
//! so tests can substitute a manual clock and stay deterministic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of "now" for TTL, sliding-window, and bucket-key arithmetic.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock. The default for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests.
///
/// Starts at the given instant and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    /// Create a clock frozen at the current system time.
    pub fn from_system() -> Arc<Self> {
        Self::new(Utc::now())
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero());
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::from_system();
        let before = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now() - before, chrono::Duration::seconds(90));
    }

    #[test]
    fn manual_clock_is_frozen_between_advances() {
        let clock = ManualClock::from_system();
        assert_eq!(clock.now(), clock.now());
    }
}
