//! Sliding-window rate limiter.
//!
//! Counts requests per string identity inside a trailing window. State lives
//! in a `DashMap`, so the check-then-record runs under the per-identity
//! entry guard and two concurrent callers cannot both sneak past the limit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::clock::Clock;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Per-identity request window.
#[derive(Debug, Default)]
struct Window {
    timestamps: Vec<DateTime<Utc>>,
}

/// Sliding-window request counter keyed by identity strings such as
/// `"action:subject"`.
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Check `identity` against `limit` requests per `window` and record the
    /// request if allowed.
    ///
    /// Stale timestamps are pruned lazily here; there is no background
    /// pruning per identity. The prune, check, and append are one critical
    /// section.
    pub fn check_and_record(&self, identity: &str, limit: usize, window: Duration) -> Decision {
        let now = self.clock.now();
        let window =
            chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        let window_start = now - window;

        let mut entry = self.windows.entry(identity.to_string()).or_default();
        entry.timestamps.retain(|t| *t > window_start);

        if entry.timestamps.len() >= limit {
            return Decision::Denied;
        }

        entry.timestamps.push(now);
        Decision::Allowed
    }

    /// Drop identities with no requests newer than `idle_after`.
    ///
    /// Bounds growth from one-off callers; invoked by the runtime's periodic
    /// cleanup.
    pub fn prune_idle(&self, idle_after: Duration) {
        let now = self.clock.now();
        let idle =
            chrono::Duration::from_std(idle_after).unwrap_or(chrono::Duration::zero());
        let cutoff = now - idle;

        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.timestamps.retain(|t| *t > cutoff);
            !window.timestamps.is_empty()
        });

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!("Pruned {} idle rate-limit identities", removed);
        }
    }

    /// Forget all requests for an identity.
    pub fn reset(&self, identity: &str) {
        self.windows.remove(identity);
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("identities", &self.windows.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = ManualClock::from_system();
        (RateLimiter::new(clock.clone()), clock)
    }

    #[test]
    fn allows_up_to_limit_then_denies() {
        let (limiter, _clock) = limiter();
        let window = Duration::from_secs(1);

        for _ in 0..5 {
            assert_eq!(limiter.check_and_record("cmd:u1", 5, window), Decision::Allowed);
        }
        assert_eq!(limiter.check_and_record("cmd:u1", 5, window), Decision::Denied);
    }

    #[test]
    fn window_elapse_allows_again() {
        let (limiter, clock) = limiter();
        let window = Duration::from_secs(1);

        for _ in 0..5 {
            limiter.check_and_record("cmd:u1", 5, window);
        }
        assert_eq!(limiter.check_and_record("cmd:u1", 5, window), Decision::Denied);

        clock.advance(Duration::from_millis(1100));
        assert_eq!(limiter.check_and_record("cmd:u1", 5, window), Decision::Allowed);
    }

    #[test]
    fn four_rapid_calls_with_limit_three() {
        let (limiter, _clock) = limiter();

        let decisions: Vec<Decision> = (0..4)
            .map(|_| limiter.check_and_record("spam:user1", 3, Duration::from_secs(5)))
            .collect();

        assert_eq!(
            decisions,
            vec![
                Decision::Allowed,
                Decision::Allowed,
                Decision::Allowed,
                Decision::Denied
            ]
        );
    }

    #[test]
    fn denied_calls_are_not_recorded() {
        let (limiter, clock) = limiter();
        let window = Duration::from_secs(2);

        assert!(limiter.check_and_record("k", 1, window).is_allowed());
        // Denied attempts must not extend the occupied window.
        for _ in 0..10 {
            limiter.check_and_record("k", 1, window);
        }

        clock.advance(Duration::from_millis(2100));
        assert!(limiter.check_and_record("k", 1, window).is_allowed());
    }

    #[test]
    fn identities_are_independent() {
        let (limiter, _clock) = limiter();
        let window = Duration::from_secs(1);

        assert!(limiter.check_and_record("a", 1, window).is_allowed());
        assert!(limiter.check_and_record("b", 1, window).is_allowed());
        assert!(!limiter.check_and_record("a", 1, window).is_allowed());
    }

    #[test]
    fn prune_idle_drops_stale_identities() {
        let (limiter, clock) = limiter();

        limiter.check_and_record("old", 5, Duration::from_secs(60));
        clock.advance(Duration::from_secs(400));
        limiter.check_and_record("fresh", 5, Duration::from_secs(60));

        limiter.prune_idle(Duration::from_secs(300));

        assert_eq!(limiter.len(), 1);
        // "fresh" still has budget accounted for.
        assert!(limiter.check_and_record("fresh", 5, Duration::from_secs(60)).is_allowed());
    }

    #[test]
    fn reset_forgets_history() {
        let (limiter, _clock) = limiter();
        let window = Duration::from_secs(60);

        limiter.check_and_record("k", 1, window);
        assert!(!limiter.check_and_record("k", 1, window).is_allowed());

        limiter.reset("k");
        assert!(limiter.check_and_record("k", 1, window).is_allowed());
    }
}
