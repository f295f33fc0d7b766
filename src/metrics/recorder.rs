//! Buffered metrics recorder.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::store::{DocumentStore, FieldOp};
use crate::task::ScheduledTask;

use super::report::{self, CommandStats, PerformanceStats};
use super::{MetricKind, MetricRecord};

/// Append-only event buffer with periodic batched persistence.
///
/// Records are grouped by calendar date and written as one array-union per
/// bucket. A failed flush puts the whole batch back at the head of the
/// buffer, so delivery is at-least-once; the store's union semantics absorb
/// re-delivered duplicates.
pub struct MetricsRecorder {
    buffer: Mutex<Vec<MetricRecord>>,
    capacity: usize,
    flush_interval: Duration,
    store_timeout: Duration,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    /// Next sequence number stamped onto a record.
    seq: AtomicU64,
    flush_task: Mutex<Option<ScheduledTask>>,
}

/// Batch swapped out of the buffer for persistence.
///
/// Dropping it without [`commit`](PendingBatch::commit) puts every record
/// back at the head of the buffer in original order, so a failed or
/// cancelled flush loses nothing.
struct PendingBatch<'a> {
    buffer: &'a Mutex<Vec<MetricRecord>>,
    records: Vec<MetricRecord>,
}

impl<'a> PendingBatch<'a> {
    fn take(buffer: &'a Mutex<Vec<MetricRecord>>) -> Self {
        let records = std::mem::take(&mut *buffer.lock());
        Self { buffer, records }
    }

    fn commit(mut self) {
        self.records.clear();
    }
}

impl Drop for PendingBatch<'_> {
    fn drop(&mut self) {
        if self.records.is_empty() {
            return;
        }

        let mut buffer = self.buffer.lock();
        let mut requeued = std::mem::take(&mut self.records);
        requeued.append(&mut buffer);
        *buffer = requeued;
    }
}

impl MetricsRecorder {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        capacity: usize,
        flush_interval: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            capacity,
            flush_interval,
            store_timeout,
            store,
            clock,
            seq: AtomicU64::new(0),
            flush_task: Mutex::new(None),
        }
    }

    /// Buffer a record. Reaching the buffer capacity triggers an immediate
    /// flush before this call returns; a failed flush is logged and retried
    /// on the next cycle, never surfaced to the recording caller.
    pub async fn record(&self, kind: MetricKind, payload: Value) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let record = MetricRecord::new(kind, payload, self.clock.now(), seq);

        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.push(record);
            buffer.len() >= self.capacity
        };

        if should_flush
            && let Err(e) = self.flush().await
        {
            warn!("Automatic metrics flush failed: {}", e);
        }
    }

    /// Drain the buffer and persist it, one write per distinct date bucket.
    ///
    /// The buffer is swapped out atomically, so records arriving during the
    /// store writes land in the fresh buffer. The in-flight batch lives in a
    /// guard that requeues it at the head of the buffer when the flush fails
    /// or its future is cancelled mid-write. Returns the number of records
    /// persisted.
    pub async fn flush(&self) -> Result<usize> {
        let batch = PendingBatch::take(&self.buffer);
        if batch.records.is_empty() {
            return Ok(0);
        }
        let count = batch.records.len();

        match self.persist(&batch.records).await {
            Ok(()) => {
                batch.commit();
                debug!("Flushed {} metrics to store", count);
                Ok(count)
            }
            Err(e) => {
                warn!("Failed to flush metrics buffer: {}", e);
                // Dropping the guard requeues the batch in arrival order.
                drop(batch);
                Err(e)
            }
        }
    }

    async fn persist(&self, batch: &[MetricRecord]) -> Result<()> {
        // BTreeMap keeps bucket ordering stable regardless of arrival order.
        let mut groups: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for record in batch {
            groups
                .entry(record.bucket_key.as_str())
                .or_default()
                .push(serde_json::to_value(record)?);
        }

        let now = self.clock.now();
        for (bucket, records) in groups {
            let ops = vec![
                ("records".to_string(), FieldOp::ArrayUnion(records)),
                (
                    "last_updated".to_string(),
                    FieldOp::Set(serde_json::to_value(now)?),
                ),
            ];

            tokio::time::timeout(
                self.store_timeout,
                self.store.update(&format!("metrics/{bucket}"), ops),
            )
            .await
            .map_err(|_| Error::StoreTimeout(self.store_timeout))??;
        }

        Ok(())
    }

    /// Read back persisted records for an inclusive date range, optionally
    /// filtered by kind.
    pub async fn query(
        &self,
        kind: Option<MetricKind>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricRecord>> {
        let docs = tokio::time::timeout(
            self.store_timeout,
            self.store
                .list_range("metrics", &start.to_string(), &end.to_string()),
        )
        .await
        .map_err(|_| Error::StoreTimeout(self.store_timeout))??;

        let mut records = Vec::new();
        for (id, doc) in docs {
            let Some(values) = doc.get("records").and_then(Value::as_array) else {
                continue;
            };

            for value in values {
                match serde_json::from_value::<MetricRecord>(value.clone()) {
                    Ok(record) => {
                        if kind.is_none_or(|k| record.kind == k) {
                            records.push(record);
                        }
                    }
                    Err(e) => warn!("Skipping malformed metric record in {}: {}", id, e),
                }
            }
        }

        Ok(records)
    }

    /// Command-usage aggregate over the trailing `days` days.
    pub async fn command_stats(&self, days: u64) -> Result<CommandStats> {
        let end = self.clock.now().date_naive();
        let start = end
            .checked_sub_days(chrono::Days::new(days))
            .unwrap_or(end);

        let records = self.query(Some(MetricKind::Command), start, end).await?;
        Ok(report::summarize_commands(&records))
    }

    /// Latency aggregate over the trailing `hours` hours, optionally for a
    /// single named operation.
    pub async fn performance_stats(
        &self,
        operation: Option<&str>,
        hours: i64,
    ) -> Result<PerformanceStats> {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::hours(hours);

        let records = self
            .query(
                Some(MetricKind::Performance),
                cutoff.date_naive(),
                now.date_naive(),
            )
            .await?;

        let recent: Vec<MetricRecord> = records
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect();

        Ok(report::summarize_performance(&recent, operation))
    }

    /// Start the interval flush. Calling again while the task is running is
    /// a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.flush_task.lock();
        if task.is_some() {
            debug!("Metrics flush task already running");
            return;
        }

        let recorder = Arc::clone(self);
        *task = Some(ScheduledTask::spawn(
            "metrics-flush",
            self.flush_interval,
            move || {
                let recorder = Arc::clone(&recorder);
                async move {
                    if let Err(e) = recorder.flush().await {
                        warn!("Periodic metrics flush failed: {}", e);
                    }
                }
            },
        ));
    }

    /// Stop the interval flush and make one final flush attempt.
    ///
    /// Waits for any in-flight interval flush to unwind first, so its batch
    /// is either persisted or back in the buffer before the final drain.
    pub async fn shutdown(&self) {
        let task = self.flush_task.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }

        if let Err(e) = self.flush().await {
            warn!("Final metrics flush failed, {} records abandoned: {}", self.buffer_len(), e);
        }
    }

    /// Number of records currently buffered.
    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().len()
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("buffered", &self.buffer_len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Store wrapper that counts update calls and can fail on demand.
    #[derive(Default)]
    struct TestStore {
        inner: MemoryStore,
        updates: AtomicUsize,
        fail_remaining: AtomicUsize,
    }

    impl TestStore {
        fn fail_next(&self, n: usize) {
            self.fail_remaining.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DocumentStore for TestStore {
        async fn get(&self, id: &str) -> Result<Option<crate::store::Document>> {
            self.inner.get(id).await
        }

        async fn set(&self, id: &str, doc: crate::store::Document, merge: bool) -> Result<()> {
            self.inner.set(id, doc, merge).await
        }

        async fn update(&self, id: &str, ops: Vec<(String, FieldOp)>) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);

            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Store("injected failure".to_string()));
            }

            self.inner.update(id, ops).await
        }

        async fn list_range(
            &self,
            collection: &str,
            from: &str,
            to: &str,
        ) -> Result<Vec<(String, crate::store::Document)>> {
            self.inner.list_range(collection, from, to).await
        }
    }

    /// Store whose next update call parks until released, signalling entry.
    #[derive(Default)]
    struct BlockingStore {
        inner: MemoryStore,
        block_next: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl DocumentStore for BlockingStore {
        async fn get(&self, id: &str) -> Result<Option<crate::store::Document>> {
            self.inner.get(id).await
        }

        async fn set(&self, id: &str, doc: crate::store::Document, merge: bool) -> Result<()> {
            self.inner.set(id, doc, merge).await
        }

        async fn update(&self, id: &str, ops: Vec<(String, FieldOp)>) -> Result<()> {
            if self.block_next.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.update(id, ops).await
        }

        async fn list_range(
            &self,
            collection: &str,
            from: &str,
            to: &str,
        ) -> Result<Vec<(String, crate::store::Document)>> {
            self.inner.list_range(collection, from, to).await
        }
    }

    fn recorder(capacity: usize) -> (Arc<MetricsRecorder>, Arc<TestStore>, Arc<ManualClock>) {
        let store = Arc::new(TestStore::default());
        let clock = ManualClock::from_system();
        let recorder = Arc::new(MetricsRecorder::new(
            store.clone(),
            clock.clone(),
            capacity,
            Duration::from_secs(30),
            Duration::from_secs(5),
        ));
        (recorder, store, clock)
    }

    #[tokio::test]
    async fn filling_the_buffer_triggers_exactly_one_flush() {
        let (recorder, store, _clock) = recorder(100);

        for _ in 0..101 {
            recorder.record(MetricKind::Command, json!({"command": "daily"})).await;
        }

        // One automatic flush fired at record #100; #101 stays buffered.
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.buffer_len(), 1);
    }

    #[tokio::test]
    async fn failed_flush_requeues_then_succeeds_on_retry() {
        let (recorder, store, clock) = recorder(100);

        for i in 0..5 {
            recorder
                .record(MetricKind::Command, json!({"command": format!("cmd{i}")}))
                .await;
        }

        store.fail_next(1);
        assert!(recorder.flush().await.is_err());
        // Nothing lost: the whole batch is back in the buffer.
        assert_eq!(recorder.buffer_len(), 5);

        assert_eq!(recorder.flush().await.unwrap(), 5);
        assert_eq!(recorder.buffer_len(), 0);

        let today = clock.now().date_naive();
        let persisted = recorder.query(None, today, today).await.unwrap();
        assert_eq!(persisted.len(), 5);
    }

    #[tokio::test]
    async fn requeued_records_precede_newer_arrivals() {
        let (recorder, store, _clock) = recorder(100);

        recorder.record(MetricKind::Command, json!({"command": "first"})).await;
        store.fail_next(1);
        assert!(recorder.flush().await.is_err());

        recorder.record(MetricKind::Command, json!({"command": "second"})).await;

        let buffered: Vec<String> = {
            let buffer = recorder.buffer.lock();
            buffer
                .iter()
                .map(|r| r.payload["command"].as_str().unwrap_or("").to_string())
                .collect()
        };
        assert_eq!(buffered, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn flush_writes_one_batch_per_date_bucket() {
        let (recorder, store, clock) = recorder(100);

        recorder.record(MetricKind::Command, json!({"command": "a"})).await;
        clock.advance(Duration::from_secs(86_400));
        recorder.record(MetricKind::Command, json!({"command": "b"})).await;

        assert_eq!(recorder.flush().await.unwrap(), 2);
        // Two distinct days, two writes.
        assert_eq!(store.updates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_filters_by_kind_and_range() {
        let (recorder, _store, clock) = recorder(100);
        let day_one = clock.now().date_naive();

        recorder.record(MetricKind::Command, json!({"command": "a"})).await;
        recorder.record(MetricKind::Status, json!({"servers": 2})).await;
        clock.advance(Duration::from_secs(86_400));
        recorder.record(MetricKind::Command, json!({"command": "b"})).await;
        recorder.flush().await.unwrap();

        let commands = recorder
            .query(Some(MetricKind::Command), day_one, clock.now().date_naive())
            .await
            .unwrap();
        assert_eq!(commands.len(), 2);

        let first_day_only = recorder
            .query(None, day_one, day_one)
            .await
            .unwrap();
        assert_eq!(first_day_only.len(), 2);
    }

    #[tokio::test]
    async fn command_stats_counts_by_command_and_day() {
        let (recorder, _store, clock) = recorder(100);

        for command in ["daily", "daily", "balance"] {
            recorder
                .record(
                    MetricKind::Command,
                    json!({"command": command, "actor_id": "u1", "scope_id": "g1"}),
                )
                .await;
        }
        recorder.flush().await.unwrap();

        let stats = recorder.command_stats(7).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_command.get("daily"), Some(&2));
        assert_eq!(stats.by_command.get("balance"), Some(&1));
        assert_eq!(stats.by_actor.get("u1"), Some(&3));
        assert_eq!(
            stats.by_day.get(&clock.now().date_naive().to_string()),
            Some(&3)
        );
    }

    #[tokio::test]
    async fn performance_stats_ignores_samples_outside_the_window() {
        let (recorder, _store, clock) = recorder(100);

        recorder
            .record(
                MetricKind::Performance,
                json!({"operation": "upsert", "duration_ms": 100.0}),
            )
            .await;
        clock.advance(Duration::from_secs(3600 * 48));
        recorder
            .record(
                MetricKind::Performance,
                json!({"operation": "upsert", "duration_ms": 10.0}),
            )
            .await;
        recorder.flush().await.unwrap();

        let stats = recorder.performance_stats(Some("upsert"), 24).await.unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.avg_ms, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_flush_drains_the_buffer() {
        let (recorder, store, _clock) = recorder(100);

        recorder.record(MetricKind::Status, json!({"servers": 1})).await;
        recorder.start();
        recorder.start(); // idempotent

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(recorder.buffer_len(), 0);
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);

        recorder.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_performs_a_final_flush() {
        let (recorder, store, _clock) = recorder(100);

        recorder.record(MetricKind::Error, json!({"error": "boom"})).await;
        recorder.shutdown().await;

        assert_eq!(recorder.buffer_len(), 0);
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identical_records_remain_distinct_in_storage() {
        let (recorder, _store, clock) = recorder(100);

        // Same kind, payload, and frozen timestamp; only seq differs.
        for _ in 0..3 {
            recorder.record(MetricKind::Command, json!({"command": "daily"})).await;
        }
        recorder.flush().await.unwrap();

        let today = clock.now().date_naive();
        let persisted = recorder.query(None, today, today).await.unwrap();
        assert_eq!(persisted.len(), 3);

        let stats = recorder.command_stats(1).await.unwrap();
        assert_eq!(stats.by_command.get("daily"), Some(&3));
    }

    #[tokio::test]
    async fn cancelled_flush_requeues_its_batch() {
        let store = Arc::new(BlockingStore::default());
        let clock = ManualClock::from_system();
        let recorder = Arc::new(MetricsRecorder::new(
            store.clone(),
            clock.clone(),
            100,
            Duration::from_secs(30),
            Duration::from_secs(3600),
        ));

        recorder.record(MetricKind::Command, json!({"command": "daily"})).await;
        store.block_next.store(true, Ordering::SeqCst);

        let flusher = {
            let recorder = recorder.clone();
            tokio::spawn(async move {
                let _ = recorder.flush().await;
            })
        };

        // The flush has swapped the batch out and is parked in the store.
        store.entered.notified().await;
        assert_eq!(recorder.buffer_len(), 0);

        flusher.abort();
        let _ = flusher.await;

        // Cancellation put the batch back; a retry persists it.
        assert_eq!(recorder.buffer_len(), 1);
        assert_eq!(recorder.flush().await.unwrap(), 1);

        let today = clock.now().date_naive();
        assert_eq!(recorder.query(None, today, today).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_recovers_a_stalled_interval_flush() {
        let store = Arc::new(BlockingStore::default());
        let clock = ManualClock::from_system();
        let recorder = Arc::new(MetricsRecorder::new(
            store.clone(),
            clock.clone(),
            100,
            Duration::from_millis(50),
            Duration::from_secs(3600),
        ));

        recorder.record(MetricKind::Command, json!({"command": "daily"})).await;
        store.block_next.store(true, Ordering::SeqCst);
        recorder.start();

        // Interval flush fires and parks mid-write holding the batch.
        store.entered.notified().await;

        recorder.shutdown().await;

        // The batch was requeued when the task unwound, then drained by the
        // final flush.
        assert_eq!(recorder.buffer_len(), 0);
        let today = clock.now().date_naive();
        assert_eq!(recorder.query(None, today, today).await.unwrap().len(), 1);
    }
}
