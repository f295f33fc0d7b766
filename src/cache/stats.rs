//! Cache counter snapshot.

/// Point-in-time view of cache activity.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Hits as a fraction of lookups, in percent. 0 when nothing was looked
    /// up yet.
    pub hit_rate: f64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub(super) fn compute(
        hits: u64,
        misses: u64,
        sets: u64,
        deletes: u64,
        size: usize,
        capacity: usize,
    ) -> Self {
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64 * 100.0
        };

        Self {
            hits,
            misses,
            sets,
            deletes,
            hit_rate,
            size,
            capacity,
        }
    }
}
