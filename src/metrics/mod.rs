//! Metrics module - buffered telemetry recorder.
//!
//! Decouples the hot path from durable telemetry writes: records are
//! buffered in memory and flushed in date-bucketed batches, either when the
//! buffer fills or on a fixed interval. Delivery is at-least-once; a failed
//! flush re-queues the whole batch for the next cycle.
//!
//! ## Layout
//!
//! - `MetricRecord` / `MetricKind` - the immutable buffered records
//! - `MetricsRecorder` - buffer, flush machinery, and read-back queries
//! - `report` - derived aggregates (command usage, latency percentiles)

mod record;
mod recorder;
mod report;

pub use record::{MetricKind, MetricRecord};
pub use recorder::MetricsRecorder;
pub use report::{CommandStats, PerformanceStats, percentile};
