//! Polling scheduler.
//!
//! One tick walks every active watcher, polls the ones whose interval has
//! elapsed, and persists each watcher's cycle as a single batch. A watcher
//! whose previous cycle is still running is skipped for that tick, and a
//! failing pool or watcher never stops the others.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alert_engine::{compute_deltas, evaluate};
use chrono::Utc;
use dashmap::DashSet;
use futures_util::future::join_all;
use pool_core::{
    AdapterError, FetchContext, PoolConfig, PoolMetricSnapshot, VersionedConfig, WatcherStatus,
};
use protocol_adapters::AdapterRegistry;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use watcher_store::{CycleBatch, MetricsStore, WatcherConfigStore, WatcherEntry};

use crate::WatcherError;

pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 12_000;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Used by watchers whose config has no `pollingIntervalMs`.
    pub default_polling_interval: Duration,
    /// How often due watchers are looked up.
    pub tick_interval: Duration,
    pub adapter_timeout: Duration,
    pub lease_ttl: Duration,
    /// Lease owner id of this process.
    pub instance_id: String,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            default_polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            tick_interval: Duration::from_secs(1),
            adapter_timeout: Duration::from_secs(10),
            lease_ttl: Duration::from_secs(60),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub pools: usize,
    pub snapshots: usize,
    pub deltas: usize,
    pub alerts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(CycleStats),
    /// The previous cycle of this watcher has not finished.
    InFlight,
    /// Another instance holds the polling lease.
    LeaseUnavailable,
    /// The config changed while polling; the cycle was discarded.
    Superseded,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    registry: Arc<AdapterRegistry>,
    metrics: Arc<dyn MetricsStore>,
    configs: Arc<dyn WatcherConfigStore>,
    options: SchedulerOptions,
    in_flight: Arc<DashSet<String>>,
    running: AtomicBool,
    /// Epoch ms of the last finished cycle, 0 before any.
    last_run_at: AtomicI64,
    handle: Mutex<Option<RunningLoop>>,
}

/// Marks a watcher as being polled until dropped.
pub(crate) struct InFlightGuard {
    set: Arc<DashSet<String>>,
    watcher_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.watcher_id);
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        metrics: Arc<dyn MetricsStore>,
        configs: Arc<dyn WatcherConfigStore>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                metrics,
                configs,
                options,
                in_flight: Arc::new(DashSet::new()),
                running: AtomicBool::new(false),
                last_run_at: AtomicI64::new(0),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.inner.registry
    }

    pub fn metrics_store(&self) -> &Arc<dyn MetricsStore> {
        &self.inner.metrics
    }

    pub fn config_store(&self) -> &Arc<dyn WatcherConfigStore> {
        &self.inner.configs
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.inner.options
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn last_run_at(&self) -> Option<i64> {
        match self.inner.last_run_at.load(Ordering::SeqCst) {
            0 => None,
            at => Some(at),
        }
    }

    /// Start the tick loop on the current runtime.
    pub async fn start(&self) -> Result<(), WatcherError> {
        let mut handle = self.inner.handle.lock().await;
        if handle.is_some() {
            return Err(WatcherError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = self.clone();
        let task = tokio::spawn(async move { scheduler.run_loop(shutdown_rx).await });

        *handle = Some(RunningLoop { shutdown, task });
        self.inner.running.store(true, Ordering::SeqCst);

        tracing::info!(
            instance = %self.inner.options.instance_id,
            tick_ms = self.inner.options.tick_interval.as_millis() as u64,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop the tick loop. Cycles already running are awaited, so every
    /// watcher ends either fully committed or untouched.
    pub async fn stop(&self) {
        let Some(running) = self.inner.handle.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            tracing::error!("Scheduler loop ended abnormally: {}", e);
        }
        self.inner.running.store(false, Ordering::SeqCst);
        tracing::info!("Scheduler stopped");
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.inner.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = JoinSet::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    while cycles.try_join_next().is_some() {}

                    let due = match self.due_watchers(Utc::now().timestamp_millis()).await {
                        Ok(due) => due,
                        Err(e) => {
                            tracing::error!("Failed to list watchers: {}", e);
                            continue;
                        }
                    };

                    for entry in due {
                        let Some(guard) = self.begin(&entry.watcher_id) else {
                            tracing::debug!(watcher_id = %entry.watcher_id, "Previous cycle still running, skipping tick");
                            continue;
                        };
                        let scheduler = self.clone();
                        cycles.spawn(async move {
                            scheduler.run_guarded(&entry.watcher_id, guard).await;
                        });
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        while cycles.join_next().await.is_some() {}
    }

    /// Poll every due watcher once and wait for all of them.
    pub async fn run_due(&self) -> Result<usize, WatcherError> {
        let due = self.due_watchers(Utc::now().timestamp_millis()).await?;
        let count = due.len();

        let cycles = due.into_iter().filter_map(|entry| {
            let guard = self.begin(&entry.watcher_id)?;
            Some(async move { self.run_guarded(&entry.watcher_id, guard).await })
        });
        join_all(cycles).await;

        Ok(count)
    }

    /// Poll one watcher now, regardless of its interval or status.
    pub async fn poll_watcher(&self, watcher_id: &str) -> Result<PollOutcome, WatcherError> {
        match self.begin(watcher_id) {
            Some(_guard) => self.poll_leased(watcher_id).await,
            None => Ok(PollOutcome::InFlight),
        }
    }

    pub(crate) fn begin(&self, watcher_id: &str) -> Option<InFlightGuard> {
        if !self.inner.in_flight.insert(watcher_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.inner.in_flight),
            watcher_id: watcher_id.to_string(),
        })
    }

    async fn run_guarded(&self, watcher_id: &str, guard: InFlightGuard) {
        let started = Instant::now();
        match self.poll_leased(watcher_id).await {
            Ok(PollOutcome::Completed(stats)) => tracing::info!(
                watcher_id = %watcher_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                pools = stats.pools,
                snapshots = stats.snapshots,
                deltas = stats.deltas,
                alerts = stats.alerts,
                "Poll cycle complete"
            ),
            Ok(outcome) => tracing::debug!(watcher_id = %watcher_id, ?outcome, "Poll cycle skipped"),
            Err(e) => tracing::error!(watcher_id = %watcher_id, "Poll cycle failed: {}", e),
        }
        drop(guard);
    }

    async fn due_watchers(&self, now: i64) -> Result<Vec<WatcherEntry>, WatcherError> {
        let default_ms = self.inner.options.default_polling_interval.as_millis() as i64;
        let watchers = self.inner.configs.list_watchers().await?;

        Ok(watchers
            .into_iter()
            .filter(|w| w.status == WatcherStatus::Active)
            .filter(|w| {
                let interval = w
                    .config
                    .polling_interval_ms
                    .map(|ms| ms as i64)
                    .unwrap_or(default_ms);
                w.last_run_at.map_or(true, |last| now - last >= interval)
            })
            .collect())
    }

    async fn poll_leased(&self, watcher_id: &str) -> Result<PollOutcome, WatcherError> {
        let configs = &self.inner.configs;
        let owner = &self.inner.options.instance_id;
        let now = Utc::now().timestamp_millis();
        let ttl_ms = self.inner.options.lease_ttl.as_millis() as i64;

        let versioned = configs
            .latest(watcher_id)
            .await?
            .ok_or_else(|| WatcherError::NotConfigured(watcher_id.to_string()))?;

        if !configs.try_acquire_lease(watcher_id, owner, ttl_ms, now).await? {
            return Ok(PollOutcome::LeaseUnavailable);
        }

        let outcome = self.poll_cycle(watcher_id, &versioned, now).await;

        if let Err(e) = configs.release_lease(watcher_id, owner).await {
            tracing::warn!(watcher_id = %watcher_id, "Failed to release lease: {}", e);
        }
        outcome
    }

    async fn poll_cycle(
        &self,
        watcher_id: &str,
        versioned: &VersionedConfig,
        now: i64,
    ) -> Result<PollOutcome, WatcherError> {
        let metrics = &self.inner.metrics;
        let config = &versioned.config;

        let context = FetchContext {
            timestamp: now,
            block_tag: None,
        };
        let fetched = join_all(config.pools.iter().map(|pool| self.fetch_pool(pool, &context))).await;
        let snapshots: Vec<PoolMetricSnapshot> = fetched.into_iter().flatten().collect();

        let mut stats = CycleStats {
            pools: config.pools.len(),
            ..CycleStats::default()
        };

        // Baselines are read before anything from this cycle is written.
        let mut batch = CycleBatch::default();
        for snapshot in snapshots {
            let previous = metrics
                .latest_snapshot(watcher_id, &snapshot.protocol_id, &snapshot.pool_id)
                .await?;
            let deltas = compute_deltas(previous.as_ref(), &snapshot);
            let alerts = evaluate(&deltas, &snapshot, previous.as_ref(), &config.threshold_rules, now);

            for alert in &alerts {
                tracing::warn!(
                    watcher_id = %watcher_id,
                    rule = %alert.rule_id,
                    pool_id = %alert.pool_id,
                    "{}",
                    alert.message
                );
            }

            batch.deltas.extend(deltas);
            batch.alerts.extend(alerts);
            batch.snapshots.push(snapshot);
        }

        // An empty batch still records the run, under the same version check.
        if !metrics.commit_cycle(watcher_id, versioned.version, &batch, now).await? {
            tracing::info!(watcher_id = %watcher_id, "Config changed during poll, discarding cycle");
            return Ok(PollOutcome::Superseded);
        }

        stats.snapshots = batch.snapshots.len();
        stats.deltas = batch.deltas.len();
        stats.alerts = batch.alerts.len();
        self.inner.last_run_at.store(now, Ordering::SeqCst);

        Ok(PollOutcome::Completed(stats))
    }

    async fn fetch_pool(&self, pool: &PoolConfig, context: &FetchContext) -> Option<PoolMetricSnapshot> {
        let Some(adapter) = self.inner.registry.resolve(&pool.protocol_id) else {
            tracing::warn!(
                protocol_id = %pool.protocol_id,
                pool_id = %pool.id,
                "No adapter registered for protocol, skipping pool"
            );
            return None;
        };

        let timeout = self.inner.options.adapter_timeout;
        let result = match time::timeout(timeout, adapter.fetch_latest_metrics(pool, context)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(timeout.as_millis() as u64)),
        };

        match result {
            Ok(Some(snapshot)) => Some(snapshot),
            Ok(None) => {
                tracing::debug!(adapter = adapter.id(), pool_id = %pool.id, "Adapter returned no snapshot");
                None
            }
            Err(e) => {
                tracing::warn!(adapter = adapter.id(), pool_id = %pool.id, "Fetch failed: {}", e);
                None
            }
        }
    }
}
