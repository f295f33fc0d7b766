//! Configuration module for the Arcadia runtime.
//!
//! The runtime is a library, so [`RuntimeConfig::default`] is the primary
//! entry point; `from_env` exists for binaries that configure through the
//! environment.

use std::env;
use std::time::Duration;

/// Tunables for the runtime support layer.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum number of cache entries before eviction kicks in.
    pub cache_capacity: usize,

    /// How often the cache sweeps its expiry index.
    pub cache_sweep_interval: Duration,

    /// TTL applied to cached command counters.
    pub counter_ttl: Duration,

    /// TTL for the cached rolling status snapshot.
    pub status_cache_ttl: Duration,

    /// TTL for cached guild documents.
    pub guild_cache_ttl: Duration,

    /// TTL for cached member documents.
    pub member_cache_ttl: Duration,

    /// TTL for cached cross-guild user documents.
    pub user_cache_ttl: Duration,

    /// Buffered metric records before an automatic flush.
    pub metrics_buffer_capacity: usize,

    /// How often the metrics buffer flushes regardless of fill level.
    pub metrics_flush_interval: Duration,

    /// How often the runtime runs its self-maintenance pass.
    pub cleanup_interval: Duration,

    /// Rate-limit identities idle longer than this are garbage-collected.
    pub rate_limit_idle_window: Duration,

    /// In-flight operation bookkeeping older than this is considered stale.
    pub stale_operation_timeout: Duration,

    /// Bound on every durable store round trip.
    pub store_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 10_000,
            cache_sweep_interval: Duration::from_secs(60),
            counter_ttl: Duration::from_secs(3600),
            status_cache_ttl: Duration::from_secs(60),
            guild_cache_ttl: Duration::from_secs(3600),
            member_cache_ttl: Duration::from_secs(1800),
            user_cache_ttl: Duration::from_secs(3600),
            metrics_buffer_capacity: 100,
            metrics_flush_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300),
            rate_limit_idle_window: Duration::from_secs(300),
            stale_operation_timeout: Duration::from_secs(300),
            store_timeout: Duration::from_secs(10),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from `ARCADIA_*` environment variables.
    ///
    /// Missing or unparseable variables fall back to the defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Self {
            cache_capacity: env_usize("ARCADIA_CACHE_CAPACITY", defaults.cache_capacity),
            cache_sweep_interval: env_secs(
                "ARCADIA_CACHE_SWEEP_SECS",
                defaults.cache_sweep_interval,
            ),
            counter_ttl: env_secs("ARCADIA_COUNTER_TTL_SECS", defaults.counter_ttl),
            status_cache_ttl: env_secs("ARCADIA_STATUS_TTL_SECS", defaults.status_cache_ttl),
            guild_cache_ttl: env_secs("ARCADIA_GUILD_TTL_SECS", defaults.guild_cache_ttl),
            member_cache_ttl: env_secs("ARCADIA_MEMBER_TTL_SECS", defaults.member_cache_ttl),
            user_cache_ttl: env_secs("ARCADIA_USER_TTL_SECS", defaults.user_cache_ttl),
            metrics_buffer_capacity: env_usize(
                "ARCADIA_METRICS_BUFFER",
                defaults.metrics_buffer_capacity,
            ),
            metrics_flush_interval: env_secs(
                "ARCADIA_METRICS_FLUSH_SECS",
                defaults.metrics_flush_interval,
            ),
            cleanup_interval: env_secs("ARCADIA_CLEANUP_SECS", defaults.cleanup_interval),
            rate_limit_idle_window: env_secs(
                "ARCADIA_RATE_LIMIT_IDLE_SECS",
                defaults.rate_limit_idle_window,
            ),
            stale_operation_timeout: env_secs(
                "ARCADIA_STALE_OP_SECS",
                defaults.stale_operation_timeout,
            ),
            store_timeout: env_secs("ARCADIA_STORE_TIMEOUT_SECS", defaults.store_timeout),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_sizing() {
        let config = RuntimeConfig::default();

        assert_eq!(config.cache_capacity, 10_000);
        assert_eq!(config.metrics_buffer_capacity, 100);
        assert_eq!(config.metrics_flush_interval, Duration::from_secs(30));
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn env_fallbacks_use_defaults() {
        assert_eq!(env_usize("ARCADIA_TEST_UNSET_VAR", 42), 42);
        assert_eq!(
            env_secs("ARCADIA_TEST_UNSET_VAR", Duration::from_secs(7)),
            Duration::from_secs(7)
        );
    }
}
