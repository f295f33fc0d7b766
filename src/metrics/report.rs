//! Derived aggregate reports over persisted metrics.

use std::collections::HashMap;

use serde_json::Value;

use super::MetricRecord;

/// Command-usage totals, broken down by command, scope, actor, and day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandStats {
    pub total: u64,
    pub by_command: HashMap<String, u64>,
    pub by_scope: HashMap<String, u64>,
    pub by_actor: HashMap<String, u64>,
    pub by_day: HashMap<String, u64>,
}

/// Latency summary for timed operations, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceStats {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Aggregate command records into usage counts.
pub fn summarize_commands(records: &[MetricRecord]) -> CommandStats {
    let mut stats = CommandStats {
        total: records.len() as u64,
        ..Default::default()
    };

    for record in records {
        if let Some(command) = field_str(&record.payload, "command") {
            *stats.by_command.entry(command.to_string()).or_default() += 1;
        }
        if let Some(scope) = field_str(&record.payload, "scope_id") {
            *stats.by_scope.entry(scope.to_string()).or_default() += 1;
        }
        if let Some(actor) = field_str(&record.payload, "actor_id") {
            *stats.by_actor.entry(actor.to_string()).or_default() += 1;
        }
        *stats.by_day.entry(record.bucket_key.clone()).or_default() += 1;
    }

    stats
}

/// Aggregate performance records, optionally restricted to one operation.
///
/// An empty sample yields the zero report rather than an error.
pub fn summarize_performance(
    records: &[MetricRecord],
    operation: Option<&str>,
) -> PerformanceStats {
    let durations: Vec<f64> = records
        .iter()
        .filter(|r| match operation {
            Some(op) => field_str(&r.payload, "operation") == Some(op),
            None => true,
        })
        .filter_map(|r| r.payload.get("duration_ms").and_then(Value::as_f64))
        .collect();

    if durations.is_empty() {
        return PerformanceStats::default();
    }

    let count = durations.len() as u64;
    let sum: f64 = durations.iter().sum();
    let min = durations.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = durations.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    PerformanceStats {
        count,
        avg_ms: sum / count as f64,
        min_ms: min,
        max_ms: max,
        p95_ms: percentile(&durations, 0.95),
        p99_ms: percentile(&durations, 0.99),
    }
}

/// Value at the ceiling index of `p * len` over the sorted sample.
///
/// An empty sample is a defined 0, not an error.
pub fn percentile(samples: &[f64], p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let index = (sorted.len() as f64 * p).ceil() as usize;
    sorted[index.saturating_sub(1).min(sorted.len() - 1)]
}

fn field_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricKind;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn percentile_of_empty_sample_is_zero() {
        assert_eq!(percentile(&[], 0.95), 0.0);
    }

    #[test]
    fn percentile_uses_ceiling_index() {
        let samples: Vec<f64> = (1..=100).map(|v| v as f64).collect();

        assert_eq!(percentile(&samples, 0.95), 95.0);
        assert_eq!(percentile(&samples, 0.99), 99.0);
        assert_eq!(percentile(&samples, 1.0), 100.0);
    }

    #[test]
    fn percentile_of_single_sample_is_that_sample() {
        assert_eq!(percentile(&[42.0], 0.5), 42.0);
        assert_eq!(percentile(&[42.0], 0.99), 42.0);
    }

    #[test]
    fn summarize_performance_filters_by_operation() {
        let records: Vec<MetricRecord> = [("fast", 10.0), ("slow", 500.0), ("fast", 20.0)]
            .into_iter()
            .enumerate()
            .map(|(seq, (op, ms))| {
                MetricRecord::new(
                    MetricKind::Performance,
                    json!({"operation": op, "duration_ms": ms}),
                    Utc::now(),
                    seq as u64,
                )
            })
            .collect();

        let stats = summarize_performance(&records, Some("fast"));
        assert_eq!(stats.count, 2);
        assert_eq!(stats.avg_ms, 15.0);
        assert_eq!(stats.min_ms, 10.0);
        assert_eq!(stats.max_ms, 20.0);

        let all = summarize_performance(&records, None);
        assert_eq!(all.count, 3);
    }

    #[test]
    fn summarize_commands_is_stable_across_arrival_order() {
        let make = |command: &str, seq: u64| {
            MetricRecord::new(
                MetricKind::Command,
                json!({"command": command, "actor_id": "u", "scope_id": "g"}),
                Utc::now(),
                seq,
            )
        };

        let forward = vec![make("a", 0), make("b", 1), make("a", 2)];
        let mut reversed = forward.clone();
        reversed.reverse();

        assert_eq!(
            summarize_commands(&forward),
            summarize_commands(&reversed)
        );
    }
}
