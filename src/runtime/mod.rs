//! Runtime module - the orchestration facade.
//!
//! `Runtime` is the single API surface feature code calls into: it owns the
//! cache, rate limiter, metrics recorder, and event bus for the process
//! lifetime and composes them with the durable store behind read-through and
//! write-through patterns.

mod core;
mod types;

pub use self::core::Runtime;
pub use types::{
    ComponentHealth, GuildAction, GuildProfile, HealthReport, HealthStatus, Lifecycle,
    MemberAction, StatusSnapshot,
};
