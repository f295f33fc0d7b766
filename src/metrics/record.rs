//! Metric record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category tag for a metric record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// A command was invoked.
    Command,
    /// Rolling status snapshot.
    Status,
    /// The bot joined a guild.
    GuildJoin,
    /// The bot left a guild.
    GuildLeave,
    /// A captured error.
    Error,
    /// A timed operation sample.
    Performance,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Command => "command",
            MetricKind::Status => "status",
            MetricKind::GuildJoin => "guild_join",
            MetricKind::GuildLeave => "guild_leave",
            MetricKind::Error => "error",
            MetricKind::Performance => "performance",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One buffered telemetry event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub kind: MetricKind,
    /// Kind-specific structured fields.
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    /// UTC calendar date (`YYYY-MM-DD`) used to group records into one
    /// durable write per day.
    pub bucket_key: String,
    /// Recorder-assigned sequence number. Two records with identical kind,
    /// payload, and timestamp stay distinct under the store's array-union
    /// writes, while a re-delivered record (same seq) is still absorbed.
    pub seq: u64,
}

impl MetricRecord {
    pub fn new(kind: MetricKind, payload: Value, timestamp: DateTime<Utc>, seq: u64) -> Self {
        Self {
            kind,
            payload,
            bucket_key: timestamp.format("%Y-%m-%d").to_string(),
            timestamp,
            seq,
        }
    }
}
