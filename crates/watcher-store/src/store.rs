use async_trait::async_trait;
use pool_core::{
    AlertEvent, AlertsFilter, DeltaSnapshot, MetricsFilter, PoolMetricSnapshot, VersionedConfig,
    WatcherConfig, WatcherStatus,
};
use serde::Serialize;

use crate::StoreError;

pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Retained deltas and alerts per watcher, and the cap on rows returned by a read.
    pub history_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Everything one poll cycle produced for a watcher, persisted as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleBatch {
    pub snapshots: Vec<PoolMetricSnapshot>,
    pub deltas: Vec<DeltaSnapshot>,
    pub alerts: Vec<AlertEvent>,
}

impl CycleBatch {
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.deltas.is_empty() && self.alerts.is_empty()
    }
}

/// Snapshot, delta, and alert persistence, partitioned by watcher id.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Drop all snapshots, deltas, and alerts of a watcher, and forget its last run.
    async fn reset_state(&self, watcher_id: &str) -> Result<(), StoreError>;

    async fn upsert_snapshots(
        &self,
        watcher_id: &str,
        snapshots: &[PoolMetricSnapshot],
    ) -> Result<(), StoreError>;

    /// Latest snapshot (highest timestamp) for one pool, the delta baseline.
    async fn latest_snapshot(
        &self,
        watcher_id: &str,
        protocol_id: &str,
        pool_id: &str,
    ) -> Result<Option<PoolMetricSnapshot>, StoreError>;

    /// Latest snapshot of every pool matching `filter`, ordered by pool key.
    async fn latest_snapshots(
        &self,
        watcher_id: &str,
        filter: &MetricsFilter,
    ) -> Result<Vec<PoolMetricSnapshot>, StoreError>;

    async fn append_deltas(&self, watcher_id: &str, deltas: &[DeltaSnapshot])
        -> Result<(), StoreError>;

    /// Newest `limit` deltas matching `filter`, returned oldest first.
    async fn deltas(
        &self,
        watcher_id: &str,
        filter: &MetricsFilter,
        limit: Option<usize>,
    ) -> Result<Vec<DeltaSnapshot>, StoreError>;

    /// Alerts whose id is already stored are skipped.
    async fn append_alerts(&self, watcher_id: &str, alerts: &[AlertEvent])
        -> Result<(), StoreError>;

    /// Newest `filter.limit` alerts, returned oldest first.
    async fn alerts(&self, watcher_id: &str, filter: &AlertsFilter)
        -> Result<Vec<AlertEvent>, StoreError>;

    /// Persist a whole cycle and record `ran_at` as the watcher's last run,
    /// atomically and only while `expected_version` is still the watcher's
    /// latest config. Returns `false`, writing nothing, when a newer version
    /// was saved in the meantime.
    async fn commit_cycle(
        &self,
        watcher_id: &str,
        expected_version: u64,
        batch: &CycleBatch,
        ran_at: i64,
    ) -> Result<bool, StoreError>;
}

/// A watcher identity with its current config
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherEntry {
    pub watcher_id: String,
    pub status: WatcherStatus,
    pub config: WatcherConfig,
    pub version: u64,
    pub last_run_at: Option<i64>,
}

/// Versioned watcher configs plus run bookkeeping.
#[async_trait]
pub trait WatcherConfigStore: Send + Sync {
    /// Store a new config version and return it. Versions start at 1 and only grow.
    async fn save(&self, watcher_id: &str, config: &WatcherConfig) -> Result<u64, StoreError>;

    /// Store a new config version and drop the watcher's snapshots, deltas,
    /// alerts and last run in the same unit. On failure neither happens.
    async fn save_and_reset(&self, watcher_id: &str, config: &WatcherConfig) -> Result<u64, StoreError>;

    async fn latest(&self, watcher_id: &str) -> Result<Option<VersionedConfig>, StoreError>;

    /// Every configured watcher, ordered by id.
    async fn list_watchers(&self) -> Result<Vec<WatcherEntry>, StoreError>;

    async fn set_status(&self, watcher_id: &str, status: WatcherStatus) -> Result<(), StoreError>;

    /// Take or renew the polling lease. Granted when free, expired, or already held by `owner`.
    async fn try_acquire_lease(
        &self,
        watcher_id: &str,
        owner: &str,
        ttl_ms: i64,
        now: i64,
    ) -> Result<bool, StoreError>;

    async fn release_lease(&self, watcher_id: &str, owner: &str) -> Result<(), StoreError>;
}

/// Keep the newest `limit` items of an oldest-first sequence.
pub(crate) fn newest<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}
