//! Cache module - in-process TTL cache with bounded size.
//!
//! The cache gives the runtime approximate-freshness lookups for data that
//! is expensive to refetch from the durable store. Entries carry an optional
//! absolute expiry, memory is bounded by a capacity limit with
//! oldest-by-creation eviction, and hit/miss/set/delete counters feed the
//! stats report.
//!
//! ## Layout
//!
//! - `TtlCache` - the store itself, one mutex over entries + expiry index
//! - `CacheConfig` - capacity and sweep tuning
//! - `CacheStats` - counter snapshot

mod config;
mod stats;
mod ttl;

pub use config::CacheConfig;
pub use stats::CacheStats;
pub use ttl::TtlCache;
