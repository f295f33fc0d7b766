//! Cache configuration.

use std::time::Duration;

/// Configuration for a [`TtlCache`](super::TtlCache) instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries. Inserting at capacity evicts the oldest
    /// entry first.
    pub capacity: usize,

    /// How often the background sweep scans the expiry index.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Create a config with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Set the sweep interval (builder pattern).
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
