//! TTL cache implementation.
//!
//! Entries and the expiry index live behind one mutex so the two are always
//! updated as a pair. Expiry is lazy on read plus a periodic background
//! sweep; capacity is enforced at insert time by evicting the entry with the
//! earliest creation time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::task::ScheduledTask;

use super::{CacheConfig, CacheStats};

/// A single cached entry.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: DateTime<Utc>,
    last_accessed_at: Option<DateTime<Utc>>,
    access_count: u64,
}

/// Entry store plus expiry index, always mutated together under one lock.
#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    expiry: HashMap<String, DateTime<Utc>>,
}

/// Size-bounded in-memory cache with per-entry TTL.
///
/// All mutations are single critical sections, so read-modify-write helpers
/// like [`increment_counter`](TtlCache::increment_counter) are safe under
/// concurrent callers.
pub struct TtlCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    sweep_task: Mutex<Option<ScheduledTask>>,
}

impl TtlCache {
    /// Create a cache with the given config and timestamp source.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            sweep_task: Mutex::new(None),
        }
    }

    /// Store `value` under `key`.
    ///
    /// `ttl` of `None` (or zero) means the entry never expires by time; it
    /// remains subject to size-based eviction. At capacity the oldest entry
    /// is evicted first. Always succeeds for normal operation.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.insert_locked(&mut inner, key, value, ttl, now);
        true
    }

    /// Serialize `value` and store it under `key`.
    ///
    /// Logs and reports failure instead of raising when the payload cannot
    /// be serialized.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match serde_json::to_value(value) {
            Ok(json) => self.set(key, json, ttl),
            Err(e) => {
                warn!("Cache set error for key {}: {}", key, e);
                false
            }
        }
    }

    /// Look up `key`, honoring expiry lazily.
    ///
    /// A hit updates the entry's access metadata; every call counts toward
    /// either the hit or the miss counter.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if Self::is_expired_locked(&inner, key, now) {
            self.delete_locked(&mut inner, key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed_at = Some(now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up `key` and deserialize the cached payload.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("Cache payload for key {} failed to deserialize: {}", key, e);
                None
            }
        }
    }

    /// Existence check with the same expiry semantics as `get`, without
    /// touching access metadata or the hit/miss counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if Self::is_expired_locked(&inner, key, now) {
            self.delete_locked(&mut inner, key);
            return false;
        }

        inner.entries.contains_key(key)
    }

    /// Remove `key` and its expiry record. Deleting an absent key is a
    /// no-op success.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        self.delete_locked(&mut inner, key)
    }

    /// Add `amount` to the numeric counter at `key`, treating a missing or
    /// expired entry as zero, and refresh its TTL.
    ///
    /// The whole read-modify-write runs under one lock, so concurrent
    /// increments never lose updates.
    pub fn increment_counter(&self, key: &str, amount: i64, ttl: Option<Duration>) -> i64 {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let current = if Self::is_expired_locked(&inner, key, now) {
            self.delete_locked(&mut inner, key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            0
        } else {
            match inner.entries.get_mut(key) {
                Some(entry) => {
                    entry.access_count += 1;
                    entry.last_accessed_at = Some(now);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    entry.value.as_i64().unwrap_or(0)
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    0
                }
            }
        };

        let next = current + amount;
        self.insert_locked(&mut inner, key, Value::from(next), ttl, now);
        next
    }

    /// Sweep the expiry index and drop every entry whose deadline passed.
    ///
    /// Driven on a fixed interval by [`start_sweep`](TtlCache::start_sweep);
    /// callable directly as well. Returns the number of removed entries.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .expiry
            .iter()
            .filter(|(_, deadline)| now > **deadline)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.delete_locked(&mut inner, key);
        }

        if !expired.is_empty() {
            debug!("Cleaned up {} expired cache entries", expired.len());
        }

        expired.len()
    }

    /// Evict the single entry with the earliest creation time.
    pub fn evict_oldest(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        self.evict_oldest_locked(&mut inner)
    }

    /// Evict the single entry with the earliest last-access (falling back to
    /// creation) time.
    pub fn evict_lru(&self) -> Option<String> {
        let mut inner = self.inner.lock();

        let lru = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed_at.unwrap_or(entry.created_at))
            .map(|(key, _)| key.clone());

        if let Some(key) = &lru {
            self.delete_locked(&mut inner, key);
        }

        lru
    }

    /// Maintenance pass: sweep expired entries, then trim the store back
    /// toward 80% of capacity by LRU eviction.
    pub fn maintain(&self) {
        self.cleanup_expired();

        let threshold = self.config.capacity * 4 / 5;
        loop {
            let mut inner = self.inner.lock();
            if inner.entries.len() <= threshold {
                break;
            }

            let lru = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed_at.unwrap_or(entry.created_at))
                .map(|(key, _)| key.clone());

            match lru {
                Some(key) => {
                    self.delete_locked(&mut inner, &key);
                }
                None => break,
            }
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let size = self.inner.lock().entries.len();
        CacheStats::compute(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            size,
            self.config.capacity,
        )
    }

    /// Synthetic write+read+delete round trip used by health checks.
    pub fn ping(&self) -> bool {
        let key = format!("ping:{}", self.clock.now().timestamp_nanos_opt().unwrap_or(0));
        self.set(&key, Value::from("pong"), Some(Duration::from_secs(1)));
        let ok = self.get(&key).as_ref().and_then(Value::as_str) == Some("pong");
        self.delete(&key);
        ok
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop every entry and expiry record.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.expiry.clear();
        debug!("Cache cleared");
    }

    /// Start the background expiry sweep. Calling again while a sweep task
    /// is running is a no-op.
    pub fn start_sweep(self: &Arc<Self>) {
        let mut task = self.sweep_task.lock();
        if task.is_some() {
            debug!("Cache sweep already running");
            return;
        }

        let cache = Arc::clone(self);
        *task = Some(ScheduledTask::spawn(
            "cache-sweep",
            self.config.sweep_interval,
            move || {
                let cache = Arc::clone(&cache);
                async move {
                    cache.cleanup_expired();
                }
            },
        ));
    }

    /// Stop the background sweep and clear all entries. Called once at
    /// shutdown.
    pub fn destroy(&self) {
        if let Some(task) = self.sweep_task.lock().take() {
            task.cancel();
        }
        self.clear();
    }

    fn is_expired_locked(inner: &CacheInner, key: &str, now: DateTime<Utc>) -> bool {
        match inner.expiry.get(key) {
            Some(deadline) => now > *deadline,
            None => false,
        }
    }

    /// Remove from both maps; bumps the delete counter only on real removal.
    fn delete_locked(&self, inner: &mut CacheInner, key: &str) -> bool {
        let removed = inner.entries.remove(key).is_some();
        inner.expiry.remove(key);

        if removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }

        removed
    }

    fn evict_oldest_locked(&self, inner: &mut CacheInner) -> Option<String> {
        let oldest = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(key, _)| key.clone());

        if let Some(key) = &oldest {
            self.delete_locked(inner, key);
            debug!("Evicted oldest cache entry: {}", key);
        }

        oldest
    }

    fn insert_locked(
        &self,
        inner: &mut CacheInner,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) {
        // Replacing an existing key never grows the store.
        if inner.entries.len() >= self.config.capacity && !inner.entries.contains_key(key) {
            self.evict_oldest_locked(inner);
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                last_accessed_at: None,
                access_count: 0,
            },
        );

        match ttl.filter(|d| !d.is_zero()) {
            Some(ttl) => {
                let deadline =
                    now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
                inner.expiry.insert(key.to_string(), deadline);
            }
            None => {
                inner.expiry.remove(key);
            }
        }

        self.sets.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("size", &self.len())
            .field("capacity", &self.config.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn cache_with_clock(capacity: usize) -> (Arc<TtlCache>, Arc<ManualClock>) {
        let clock = ManualClock::from_system();
        let cache = Arc::new(TtlCache::new(
            CacheConfig::with_capacity(capacity),
            clock.clone(),
        ));
        (cache, clock)
    }

    #[test]
    fn get_after_expiry_is_a_miss_and_removes_the_entry() {
        let (cache, clock) = cache_with_clock(10);

        cache.set("greeting", json!("hi"), Some(Duration::from_secs(1)));
        assert_eq!(cache.get("greeting"), Some(json!("hi")));

        let misses_before = cache.stats().misses;
        clock.advance(Duration::from_millis(1100));

        assert_eq!(cache.get("greeting"), None);
        assert_eq!(cache.stats().misses, misses_before + 1);
        // No leak: gone from the store, not just masked.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn entries_without_ttl_never_expire_by_time() {
        let (cache, clock) = cache_with_clock(10);

        cache.set("forever", json!(1), None);
        clock.advance(Duration::from_secs(86_400));

        assert_eq!(cache.get("forever"), Some(json!(1)));
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let (cache, clock) = cache_with_clock(3);

        for i in 0..10 {
            cache.set(&format!("k{i}"), json!(i), None);
            clock.advance(Duration::from_secs(1));
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn insert_at_capacity_evicts_earliest_created() {
        let (cache, clock) = cache_with_clock(3);

        for key in ["a", "b", "c"] {
            cache.set(key, json!(key), None);
            clock.advance(Duration::from_secs(1));
        }

        cache.set("d", json!("d"), None);

        assert!(!cache.contains("a"));
        for key in ["b", "c", "d"] {
            assert!(cache.contains(key), "expected {key} to survive");
        }
    }

    #[test]
    fn evict_lru_prefers_least_recently_accessed() {
        let (cache, clock) = cache_with_clock(10);

        cache.set("cold", json!(0), None);
        clock.advance(Duration::from_secs(1));
        cache.set("warm", json!(1), None);
        clock.advance(Duration::from_secs(1));

        // Touch the older entry so the newer one becomes LRU.
        cache.get("cold");

        assert_eq!(cache.evict_lru(), Some("warm".to_string()));
        assert!(cache.contains("cold"));
    }

    #[test]
    fn delete_is_idempotent() {
        let (cache, _clock) = cache_with_clock(10);

        cache.set("k", json!(1), None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert!(!cache.delete("never-existed"));
    }

    #[test]
    fn contains_does_not_touch_lookup_counters() {
        let (cache, _clock) = cache_with_clock(10);
        cache.set("k", json!(1), None);

        cache.contains("k");
        cache.contains("absent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn increment_counter_treats_missing_as_zero() {
        let (cache, _clock) = cache_with_clock(10);

        assert_eq!(cache.increment_counter("commands:daily", 1, None), 1);
        assert_eq!(cache.increment_counter("commands:daily", 2, None), 3);
    }

    #[test]
    fn increment_counter_restarts_after_expiry() {
        let (cache, clock) = cache_with_clock(10);

        cache.increment_counter("c", 5, Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.increment_counter("c", 1, Some(Duration::from_secs(1))), 1);
    }

    #[test]
    fn concurrent_increments_lose_no_updates() {
        let (cache, _clock) = cache_with_clock(10);
        let threads = 8;
        let per_thread = 200;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        cache.increment_counter("counter", 1, None);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            cache.get("counter"),
            Some(json!(threads * per_thread))
        );
    }

    #[test]
    fn cleanup_expired_removes_only_expired_entries() {
        let (cache, clock) = cache_with_clock(10);

        cache.set("short", json!(1), Some(Duration::from_secs(1)));
        cache.set("long", json!(2), Some(Duration::from_secs(60)));
        cache.set("none", json!(3), None);

        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.cleanup_expired(), 1);
        assert!(!cache.contains("short"));
        assert!(cache.contains("long"));
        assert!(cache.contains("none"));
    }

    #[test]
    fn maintain_trims_toward_eighty_percent() {
        let (cache, clock) = cache_with_clock(10);

        for i in 0..10 {
            cache.set(&format!("k{i}"), json!(i), None);
            clock.advance(Duration::from_secs(1));
        }

        cache.maintain();
        assert!(cache.len() <= 8);
    }

    #[test]
    fn stats_reports_hit_rate() {
        let (cache, _clock) = cache_with_clock(10);

        cache.set("k", json!(1), None);
        cache.get("k");
        cache.get("k");
        cache.get("absent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert!((stats.hit_rate - 200.0 / 3.0).abs() < 0.01);
    }

    #[test]
    fn ping_round_trips() {
        let (cache, _clock) = cache_with_clock(10);
        assert!(cache.ping());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn typed_accessors_round_trip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Snapshot {
            servers: u64,
        }

        let (cache, _clock) = cache_with_clock(10);
        assert!(cache.set_json("status", &Snapshot { servers: 4 }, None));
        assert_eq!(cache.get_as::<Snapshot>("status"), Some(Snapshot { servers: 4 }));
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_removes_expired_entries() {
        let (cache, clock) = cache_with_clock(10);

        cache.set("k", json!(1), Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(2));

        cache.start_sweep();
        // Starting again must not spawn a second sweep.
        cache.start_sweep();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.len(), 0);

        cache.destroy();
    }
}
