//! Public types used by the runtime facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the runtime itself.
///
/// `Initialized` is entered exactly once; after `Stopped` no further
/// operation is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Stopped,
}

/// Rolling status snapshot supplied by the caller.
///
/// The runtime persists it, caches it for quick reads, and records it as a
/// status metric; it does not introspect the chat client itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub members: u64,
    pub servers: u64,
    pub channels: u64,
    pub users: u64,
    pub uptime_secs: u64,
    pub latency_ms: u64,
}

/// Identity of a guild being upserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildProfile {
    pub id: String,
    pub name: String,
    pub member_count: u64,
}

/// Direction of a guild upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildAction {
    Joined,
    Left,
}

/// What a member did, driving which counters the upsert touches.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberAction {
    /// The member invoked a command.
    Interaction { command: String },
    /// The member sent a message; awards XP and may level them up.
    Message,
    /// One minute of voice activity.
    Voice,
}

/// Composite health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Health of one probed collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentHealth {
    Healthy,
    Unhealthy,
}

/// Result of a [`Runtime::health_check`](super::Runtime::health_check).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub store: ComponentHealth,
    pub cache: ComponentHealth,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
