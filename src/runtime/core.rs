//! Runtime orchestration core.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventKind};
use crate::metrics::{MetricKind, MetricsRecorder};
use crate::ratelimit::{Decision, RateLimiter};
use crate::store::{Document, DocumentStore, FieldOp};
use crate::task::ScheduledTask;

use super::types::{
    ComponentHealth, GuildAction, GuildProfile, HealthReport, HealthStatus, Lifecycle,
    MemberAction, StatusSnapshot,
};

/// Orchestration facade over the cache, rate limiter, metrics recorder, and
/// durable store.
///
/// One `Runtime` instance is constructed at process startup and shared
/// (behind `Arc`) for the process lifetime; no other component mutates the
/// owned structures directly.
pub struct Runtime {
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DocumentStore>,
    cache: Arc<TtlCache>,
    limiter: RateLimiter,
    metrics: Arc<MetricsRecorder>,
    events: EventBus,
    state: Mutex<Lifecycle>,
    /// In-flight durable operations, for stale-operation cleanup.
    active_ops: DashMap<String, DateTime<Utc>>,
    cleanup_task: Mutex<Option<ScheduledTask>>,
}

impl Runtime {
    /// Create a runtime against the given durable store, using the system
    /// clock.
    pub fn new(config: RuntimeConfig, store: Arc<dyn DocumentStore>) -> Arc<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a runtime with an explicit timestamp source. Tests substitute
    /// a manual clock here.
    pub fn with_clock(
        config: RuntimeConfig,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let cache = Arc::new(TtlCache::new(
            CacheConfig::with_capacity(config.cache_capacity)
                .sweep_interval(config.cache_sweep_interval),
            clock.clone(),
        ));

        let metrics = Arc::new(MetricsRecorder::new(
            store.clone(),
            clock.clone(),
            config.metrics_buffer_capacity,
            config.metrics_flush_interval,
            config.store_timeout,
        ));

        Arc::new(Self {
            limiter: RateLimiter::new(clock.clone()),
            events: EventBus::new(),
            state: Mutex::new(Lifecycle::Uninitialized),
            active_ops: DashMap::new(),
            cleanup_task: Mutex::new(None),
            config,
            clock,
            store,
            cache,
            metrics,
        })
    }

    /// One-time setup: starts the cache sweep, the metrics flush, and the
    /// runtime's own maintenance task.
    ///
    /// Idempotent - calling twice leaves the same running state as calling
    /// once, with no duplicate timers.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                Lifecycle::Initialized => {
                    debug!("Runtime already initialized");
                    return Ok(());
                }
                Lifecycle::ShuttingDown | Lifecycle::Stopped => return Err(Error::Stopped),
                Lifecycle::Uninitialized => *state = Lifecycle::Initialized,
            }
        }

        self.cache.start_sweep();
        self.metrics.start();

        let runtime = Arc::clone(self);
        *self.cleanup_task.lock() = Some(ScheduledTask::spawn(
            "runtime-cleanup",
            self.config.cleanup_interval,
            move || {
                let runtime = Arc::clone(&runtime);
                async move {
                    runtime.cleanup();
                }
            },
        ));

        info!("Runtime initialized");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        *self.state.lock()
    }

    /// The runtime's cache. Read-only composition point for feature code.
    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// The runtime's metrics recorder.
    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// The runtime's notification sink.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Record one execution of a named command: durable counter, metric
    /// record, cached counters, and a `CommandExecuted` notification.
    pub async fn record_command_execution(
        &self,
        command: &str,
        actor_id: &str,
        scope_id: Option<&str>,
    ) -> Result<()> {
        self.ensure_ready()?;

        let now = self.clock.now();
        let now_value = serde_json::to_value(now)?;

        self.store_update(
            "bot/config",
            vec![
                (
                    "status.commands_executed".to_string(),
                    FieldOp::Increment(1),
                ),
                (
                    "status.last_command_at".to_string(),
                    FieldOp::Set(now_value.clone()),
                ),
                ("status.last_updated".to_string(), FieldOp::Set(now_value)),
            ],
        )
        .await?;

        let payload = json!({
            "command": command,
            "actor_id": actor_id,
            "scope_id": scope_id,
        });
        self.metrics.record(MetricKind::Command, payload.clone()).await;

        let ttl = Some(self.config.counter_ttl);
        self.cache
            .increment_counter(&format!("commands:{command}"), 1, ttl);
        self.cache.increment_counter("commands:total", 1, ttl);

        self.events.publish(EventKind::CommandExecuted, &payload);

        debug!(
            "Command executed: {} by {} in {}",
            command,
            actor_id,
            scope_id.unwrap_or("-")
        );
        Ok(())
    }

    /// Persist a rolling status snapshot, cache it for quick reads, and
    /// record a status metric.
    pub async fn update_status(&self, snapshot: &StatusSnapshot) -> Result<()> {
        self.ensure_ready()?;

        let op_key = "update_status";
        self.track_operation(op_key);
        let result = self.update_status_inner(snapshot).await;
        self.finish_operation(op_key);
        result
    }

    async fn update_status_inner(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let started = self.clock.now();

        let mut status = serde_json::to_value(snapshot)?;
        if let Some(fields) = status.as_object_mut() {
            fields.insert("last_updated".to_string(), serde_json::to_value(started)?);
        }

        let mut doc = Document::new();
        doc.insert("status".to_string(), status);
        self.store_set("bot/config", doc, true).await?;

        self.cache
            .set_json("bot:status", snapshot, Some(self.config.status_cache_ttl));

        self.metrics
            .record(MetricKind::Status, serde_json::to_value(snapshot)?)
            .await;

        let elapsed_ms = (self.clock.now() - started).num_milliseconds();
        self.metrics
            .record(
                MetricKind::Performance,
                json!({"operation": "update_status", "duration_ms": elapsed_ms}),
            )
            .await;

        info!(
            "Status updated: {} members / {} servers / {}ms latency",
            snapshot.members, snapshot.servers, snapshot.latency_ms
        );
        Ok(())
    }

    /// Upsert guild state on join/leave.
    ///
    /// The durable write is the source of truth; the cache entry is
    /// best-effort acceleration with a fixed lifetime.
    pub async fn upsert_guild(&self, action: GuildAction, guild: &GuildProfile) -> Result<()> {
        self.ensure_ready()?;

        let op_key = format!("upsert_guild:{}", guild.id);
        self.track_operation(&op_key);
        let result = self.upsert_guild_inner(action, guild).await;
        self.finish_operation(&op_key);
        result
    }

    async fn upsert_guild_inner(&self, action: GuildAction, guild: &GuildProfile) -> Result<()> {
        let now = self.clock.now();
        let cache_key = format!("guild:{}", guild.id);
        let doc_id = format!("guilds/{}", guild.id);

        match action {
            GuildAction::Joined => {
                if self.cache.contains(&cache_key) {
                    warn!("Guild {} already cached, skipping join upsert", guild.id);
                    return Ok(());
                }

                let doc = guild_document(guild, now)?;
                self.store_set(&doc_id, doc.clone(), false).await?;
                self.seed_guild_collections(&guild.id, now).await?;
                self.cache.set(
                    &cache_key,
                    Value::Object(doc),
                    Some(self.config.guild_cache_ttl),
                );

                self.metrics
                    .record(
                        MetricKind::GuildJoin,
                        json!({
                            "guild_id": guild.id,
                            "guild_name": guild.name,
                            "member_count": guild.member_count,
                        }),
                    )
                    .await;

                info!(
                    "Guild joined: {} ({}) - {} members",
                    guild.name, guild.id, guild.member_count
                );
            }
            GuildAction::Left => {
                let now_value = serde_json::to_value(now)?;
                self.store_update(
                    &doc_id,
                    vec![
                        ("info.active".to_string(), FieldOp::Set(Value::Bool(false))),
                        (
                            "info.member_count".to_string(),
                            FieldOp::Set(Value::from(guild.member_count)),
                        ),
                        ("info.left_at".to_string(), FieldOp::Set(now_value.clone())),
                        ("updated_at".to_string(), FieldOp::Set(now_value)),
                    ],
                )
                .await?;
                self.cache.delete(&cache_key);

                self.metrics
                    .record(
                        MetricKind::GuildLeave,
                        json!({
                            "guild_id": guild.id,
                            "guild_name": guild.name,
                            "member_count": guild.member_count,
                        }),
                    )
                    .await;

                info!("Guild left: {} ({})", guild.name, guild.id);
            }
        }

        Ok(())
    }

    /// Upsert member state for an activity inside a guild scope.
    ///
    /// Read-through on the cache, write-through on success with a fixed
    /// lifetime. Message activity awards XP and runs level-up detection.
    pub async fn upsert_member(
        &self,
        scope_id: &str,
        actor_id: &str,
        action: &MemberAction,
    ) -> Result<()> {
        self.ensure_ready()?;

        let op_key = format!("upsert_member:{scope_id}:{actor_id}");
        self.track_operation(&op_key);
        let result = self.upsert_member_inner(scope_id, actor_id, action).await;
        self.finish_operation(&op_key);
        result
    }

    async fn upsert_member_inner(
        &self,
        scope_id: &str,
        actor_id: &str,
        action: &MemberAction,
    ) -> Result<()> {
        let now = self.clock.now();
        let now_value = serde_json::to_value(now)?;
        let cache_key = format!("member:{scope_id}:{actor_id}");
        let doc_id = format!("guilds/{scope_id}/members/{actor_id}");

        let mut ops = vec![
            ("updated_at".to_string(), FieldOp::Set(now_value.clone())),
            (
                "statistics.last_activity".to_string(),
                FieldOp::Set(now_value.clone()),
            ),
        ];

        match action {
            MemberAction::Interaction { command } => {
                ops.push((
                    "statistics.commands_used".to_string(),
                    FieldOp::Increment(1),
                ));
                ops.push((
                    "history.command_log".to_string(),
                    FieldOp::ArrayUnion(vec![json!({
                        "command": command,
                        "timestamp": now_value,
                    })]),
                ));
            }
            MemberAction::Message => {
                ops.push((
                    "statistics.messages_sent".to_string(),
                    FieldOp::Increment(1),
                ));
                ops.push(("xp".to_string(), FieldOp::Increment(self.xp_award())));
            }
            MemberAction::Voice => {
                ops.push(("statistics.voice_minutes".to_string(), FieldOp::Increment(1)));
            }
        }

        // A timeout here leaves the cache untouched; the store stays the
        // source of truth.
        self.store_update(&doc_id, ops).await?;

        self.update_global_user(actor_id, Some(scope_id)).await;

        let Some(updated) = self.store_get(&doc_id).await? else {
            return Ok(());
        };

        self.cache.set(
            &cache_key,
            Value::Object(updated.clone()),
            Some(self.config.member_cache_ttl),
        );

        if matches!(action, MemberAction::Message) {
            self.check_level_up(scope_id, actor_id, &updated).await?;
        }

        debug!("Member updated: {} in {}", actor_id, scope_id);
        Ok(())
    }

    /// Upsert the cross-guild `users/<id>` record: last-seen bookkeeping
    /// plus a per-guild membership entry when a scope is known.
    ///
    /// Best-effort. A fault here is logged and never fails the member flow.
    async fn update_global_user(&self, actor_id: &str, scope_id: Option<&str>) {
        if let Err(e) = self.upsert_user(actor_id, scope_id).await {
            warn!("Failed to update global user {}: {}", actor_id, e);
        }
    }

    async fn upsert_user(&self, actor_id: &str, scope_id: Option<&str>) -> Result<()> {
        let now_value = serde_json::to_value(self.clock.now())?;
        let doc_id = format!("users/{actor_id}");

        let mut ops = vec![
            ("updated_at".to_string(), FieldOp::Set(now_value.clone())),
            (
                "statistics.last_seen".to_string(),
                FieldOp::Set(now_value.clone()),
            ),
        ];
        if let Some(scope) = scope_id {
            ops.push((
                format!("guilds.{scope}.active"),
                FieldOp::Set(Value::Bool(true)),
            ));
            ops.push((format!("guilds.{scope}.last_active"), FieldOp::Set(now_value)));
        }

        self.store_update(&doc_id, ops).await?;

        if let Some(updated) = self.store_get(&doc_id).await? {
            self.cache.set(
                &format!("user:{actor_id}"),
                Value::Object(updated),
                Some(self.config.user_cache_ttl),
            );
        }

        Ok(())
    }

    /// Seed the per-guild feature config documents written once on join.
    async fn seed_guild_collections(&self, guild_id: &str, now: DateTime<Utc>) -> Result<()> {
        let now_value = serde_json::to_value(now)?;
        let configs = [
            ("members", json!({"initialized": true, "created_at": now_value})),
            ("moderation", json!({"automod": false, "log_channel": Value::Null})),
            ("economy", json!({"enabled": true, "daily_amount": 100})),
            ("leveling", json!({"enabled": true, "multiplier": 1.0})),
            ("automod", json!({"enabled": false, "filters": []})),
        ];

        for (collection, data) in configs {
            let doc = data.as_object().cloned().unwrap_or_default();
            self.store_set(&format!("guilds/{guild_id}/{collection}/config"), doc, true)
                .await?;
        }

        Ok(())
    }

    /// Level curve: `level = floor(0.1 * sqrt(xp))`. A raised level persists
    /// the new level, awards rewards, and publishes a `LevelUp` event.
    async fn check_level_up(&self, scope_id: &str, actor_id: &str, doc: &Document) -> Result<()> {
        let xp = doc.get("xp").and_then(Value::as_i64).unwrap_or(0);
        let level = doc.get("level").and_then(Value::as_i64).unwrap_or(0);
        let new_level = (0.1 * (xp as f64).sqrt()).floor() as i64;

        if new_level <= level {
            return Ok(());
        }

        let now_value = serde_json::to_value(self.clock.now())?;
        let doc_id = format!("guilds/{scope_id}/members/{actor_id}");

        let mut ops = vec![
            ("level".to_string(), FieldOp::Set(Value::from(new_level))),
            ("statistics.level_ups".to_string(), FieldOp::Increment(1)),
            (
                "history.level_history".to_string(),
                FieldOp::ArrayUnion(vec![json!({
                    "level": new_level,
                    "timestamp": now_value,
                    "xp_at_level_up": xp,
                })]),
            ),
            // Level rewards: coins every level, a badge every fifth.
            ("balance".to_string(), FieldOp::Increment(new_level * 100)),
        ];
        if new_level % 5 == 0 {
            ops.push((
                "inventory".to_string(),
                FieldOp::ArrayUnion(vec![Value::from(format!("level_{new_level}_badge"))]),
            ));
        }

        self.store_update(&doc_id, ops).await?;

        self.events.publish(
            EventKind::LevelUp,
            &json!({
                "scope_id": scope_id,
                "actor_id": actor_id,
                "level": new_level,
                "xp": xp,
            }),
        );

        info!(
            "Level up: member {} reached level {} in {}",
            actor_id, new_level, scope_id
        );
        Ok(())
    }

    /// Check an action identity against a sliding-window budget.
    ///
    /// An empty identity is a contract fault, rejected without touching the
    /// limiter or the metrics.
    pub fn check_rate_limit(
        &self,
        identity: &str,
        limit: usize,
        window: std::time::Duration,
    ) -> Result<Decision> {
        self.ensure_ready()?;

        if identity.trim().is_empty() {
            return Err(Error::InvalidIdentity);
        }

        Ok(self.limiter.check_and_record(identity, limit, window))
    }

    /// Periodic self-maintenance: prune idle rate-limit identities, abandon
    /// stale operation bookkeeping, and trim the cache.
    pub fn cleanup(&self) {
        self.limiter.prune_idle(self.config.rate_limit_idle_window);

        let now = self.clock.now();
        let stale = chrono::Duration::from_std(self.config.stale_operation_timeout)
            .unwrap_or(chrono::Duration::zero());
        self.active_ops.retain(|key, started| {
            let keep = now - *started < stale;
            if !keep {
                warn!("Abandoning stale operation bookkeeping: {}", key);
            }
            keep
        });

        self.cache.maintain();
        debug!("Cleanup completed");
    }

    /// Probe the durable store and the cache.
    ///
    /// Never fails; faults are captured in the returned report.
    pub async fn health_check(&self) -> HealthReport {
        let store_ok = matches!(
            tokio::time::timeout(self.config.store_timeout, self.store.get("bot/config")).await,
            Ok(Ok(_))
        );
        let cache_ok = self.cache.ping();

        let component = |ok: bool| {
            if ok {
                ComponentHealth::Healthy
            } else {
                ComponentHealth::Unhealthy
            }
        };

        HealthReport {
            status: if store_ok && cache_ok {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            store: component(store_ok),
            cache: component(cache_ok),
            checked_at: self.clock.now(),
        }
    }

    /// Cooperative shutdown: cancel all timers, drain the metrics buffer,
    /// and clear the cache. Idempotent; after this no operation is valid.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == Lifecycle::Stopped {
                return;
            }
            *state = Lifecycle::ShuttingDown;
        }

        if let Some(task) = self.cleanup_task.lock().take() {
            task.cancel();
        }

        self.metrics.shutdown().await;
        self.cache.destroy();

        *self.state.lock() = Lifecycle::Stopped;
        info!("Runtime stopped");
    }

    fn ensure_ready(&self) -> Result<()> {
        match *self.state.lock() {
            Lifecycle::Initialized => Ok(()),
            Lifecycle::Uninitialized => Err(Error::NotInitialized),
            Lifecycle::ShuttingDown | Lifecycle::Stopped => Err(Error::Stopped),
        }
    }

    fn track_operation(&self, key: &str) {
        self.active_ops.insert(key.to_string(), self.clock.now());
    }

    fn finish_operation(&self, key: &str) {
        self.active_ops.remove(key);
    }

    /// XP per message: 5 plus up to 14 jitter from the clock's nanoseconds.
    fn xp_award(&self) -> i64 {
        5 + (self.clock.now().timestamp_subsec_nanos() % 15) as i64
    }

    async fn store_get(&self, id: &str) -> Result<Option<Document>> {
        tokio::time::timeout(self.config.store_timeout, self.store.get(id))
            .await
            .map_err(|_| Error::StoreTimeout(self.config.store_timeout))?
    }

    async fn store_set(&self, id: &str, doc: Document, merge: bool) -> Result<()> {
        tokio::time::timeout(self.config.store_timeout, self.store.set(id, doc, merge))
            .await
            .map_err(|_| Error::StoreTimeout(self.config.store_timeout))?
    }

    async fn store_update(&self, id: &str, ops: Vec<(String, FieldOp)>) -> Result<()> {
        tokio::time::timeout(self.config.store_timeout, self.store.update(id, ops))
            .await
            .map_err(|_| Error::StoreTimeout(self.config.store_timeout))?
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("cached_entries", &self.cache.len())
            .field("tracked_identities", &self.limiter.len())
            .finish_non_exhaustive()
    }
}

/// Initial guild document written on join.
fn guild_document(guild: &GuildProfile, now: DateTime<Utc>) -> Result<Document> {
    let now_value = serde_json::to_value(now)?;

    let mut doc = Document::new();
    doc.insert(
        "info".to_string(),
        json!({
            "id": guild.id,
            "name": guild.name,
            "member_count": guild.member_count,
            "joined_at": now_value,
            "left_at": Value::Null,
            "active": true,
        }),
    );
    doc.insert("created_at".to_string(), serde_json::to_value(now)?);
    Ok(doc)
}
