//! Arcadia - Runtime support layer for the Arcadia community bot
//!
//! The pieces every feature module leans on: a TTL cache, a sliding-window
//! rate limiter, a buffered metrics recorder, and the runtime that wires them
//! to a durable document store.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `clock` - Swappable timestamp source
//! - `store` - Durable document store abstraction (plus an in-memory one)
//! - `cache` - Size-bounded TTL cache with per-entry stats
//! - `ratelimit` - Per-identity sliding-window limiter
//! - `metrics` - Buffered metrics recording and reporting
//! - `events` - In-process notification bus
//! - `runtime` - Lifecycle orchestration over all of the above

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod ratelimit;
pub mod runtime;
pub mod store;
pub mod task;

pub use cache::{CacheConfig, CacheStats, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use events::{EventBus, EventKind};
pub use metrics::{CommandStats, MetricKind, MetricRecord, MetricsRecorder, PerformanceStats};
pub use ratelimit::{Decision, RateLimiter};
pub use runtime::{
    ComponentHealth, GuildAction, GuildProfile, HealthReport, HealthStatus, Lifecycle,
    MemberAction, Runtime, StatusSnapshot,
};
pub use store::{Document, DocumentStore, FieldOp, MemoryStore};
