//! In-process backend. History lives only as long as the process.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use pool_core::{
    pool_key, AlertEvent, AlertsFilter, DeltaSnapshot, MetricsFilter, PoolMetricSnapshot,
    VersionedConfig, WatcherConfig, WatcherStatus,
};

use crate::store::{newest, CycleBatch, MetricsStore, StoreOptions, WatcherConfigStore, WatcherEntry};
use crate::{RingBuffer, StoreError};

struct WatcherState {
    latest: BTreeMap<String, PoolMetricSnapshot>,
    deltas: RingBuffer<DeltaSnapshot>,
    alerts: RingBuffer<AlertEvent>,
}

impl WatcherState {
    fn new(capacity: usize) -> Self {
        Self {
            latest: BTreeMap::new(),
            deltas: RingBuffer::new(capacity),
            alerts: RingBuffer::new(capacity),
        }
    }

    fn upsert(&mut self, snapshot: &PoolMetricSnapshot) {
        let key = snapshot.key();
        match self.latest.get(&key) {
            Some(existing) if existing.timestamp > snapshot.timestamp => {}
            _ => {
                self.latest.insert(key, snapshot.clone());
            }
        }
    }

    fn append_alerts(&mut self, alerts: &[AlertEvent]) {
        let mut seen: HashSet<String> = self.alerts.iter().map(|a| a.id.clone()).collect();
        for alert in alerts {
            if seen.insert(alert.id.clone()) {
                self.alerts.push(alert.clone());
            }
        }
    }
}

struct WatcherRecord {
    status: WatcherStatus,
    versions: Vec<VersionedConfig>,
    last_run_at: Option<i64>,
    lease: Option<(String, i64)>,
}

/// Ephemeral store keyed by watcher id. Safe under a single scheduler only.
pub struct MemoryStore {
    options: StoreOptions,
    state: DashMap<String, WatcherState>,
    watchers: DashMap<String, WatcherRecord>,
}

impl MemoryStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            state: DashMap::new(),
            watchers: DashMap::new(),
        }
    }

    fn with_state<R>(&self, watcher_id: &str, f: impl FnOnce(&mut WatcherState) -> R) -> R {
        let mut entry = self.lock_state(watcher_id);
        f(entry.value_mut())
    }

    /// Lock the watcher's state entry, creating it when missing. Paths that
    /// also touch `watchers` take this lock first.
    fn lock_state(&self, watcher_id: &str) -> RefMut<'_, String, WatcherState> {
        self.state
            .entry(watcher_id.to_string())
            .or_insert_with(|| WatcherState::new(self.options.history_capacity))
    }

    fn push_version(&self, watcher_id: &str, config: &WatcherConfig) -> u64 {
        let mut record = self
            .watchers
            .entry(watcher_id.to_string())
            .or_insert_with(|| WatcherRecord {
                status: WatcherStatus::Active,
                versions: Vec::new(),
                last_run_at: None,
                lease: None,
            });
        let version = record.versions.last().map(|v| v.version).unwrap_or(0) + 1;
        record.versions.push(VersionedConfig {
            config: config.clone(),
            version,
        });
        version
    }

    fn clear(&self, watcher_id: &str, state: &mut WatcherState) {
        *state = WatcherState::new(self.options.history_capacity);
        if let Some(mut record) = self.watchers.get_mut(watcher_id) {
            record.last_run_at = None;
        }
    }

    fn read_state<R>(&self, watcher_id: &str, f: impl FnOnce(&WatcherState) -> R) -> Option<R> {
        self.state.get(watcher_id).map(|entry| f(entry.value()))
    }

    fn read_limit(&self, limit: Option<usize>) -> usize {
        let cap = self.options.history_capacity;
        limit.map(|l| l.min(cap)).unwrap_or(cap)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn reset_state(&self, watcher_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock_state(watcher_id);
        self.clear(watcher_id, state.value_mut());
        Ok(())
    }

    async fn upsert_snapshots(
        &self,
        watcher_id: &str,
        snapshots: &[PoolMetricSnapshot],
    ) -> Result<(), StoreError> {
        self.with_state(watcher_id, |state| {
            for snapshot in snapshots {
                state.upsert(snapshot);
            }
        });
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        watcher_id: &str,
        protocol_id: &str,
        pool_id: &str,
    ) -> Result<Option<PoolMetricSnapshot>, StoreError> {
        let key = pool_key(protocol_id, pool_id);
        Ok(self
            .read_state(watcher_id, |state| state.latest.get(&key).cloned())
            .flatten())
    }

    async fn latest_snapshots(
        &self,
        watcher_id: &str,
        filter: &MetricsFilter,
    ) -> Result<Vec<PoolMetricSnapshot>, StoreError> {
        Ok(self
            .read_state(watcher_id, |state| {
                state
                    .latest
                    .values()
                    .filter(|s| filter.matches(&s.protocol_id, &s.pool_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_deltas(
        &self,
        watcher_id: &str,
        deltas: &[DeltaSnapshot],
    ) -> Result<(), StoreError> {
        if deltas.is_empty() {
            return Ok(());
        }
        self.with_state(watcher_id, |state| state.deltas.extend(deltas.iter().cloned()));
        Ok(())
    }

    async fn deltas(
        &self,
        watcher_id: &str,
        filter: &MetricsFilter,
        limit: Option<usize>,
    ) -> Result<Vec<DeltaSnapshot>, StoreError> {
        let matching = self
            .read_state(watcher_id, |state| {
                state
                    .deltas
                    .iter()
                    .filter(|d| filter.matches(&d.protocol_id, &d.pool_id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(newest(matching, self.read_limit(limit)))
    }

    async fn append_alerts(
        &self,
        watcher_id: &str,
        alerts: &[AlertEvent],
    ) -> Result<(), StoreError> {
        if alerts.is_empty() {
            return Ok(());
        }
        self.with_state(watcher_id, |state| state.append_alerts(alerts));
        Ok(())
    }

    async fn alerts(
        &self,
        watcher_id: &str,
        filter: &AlertsFilter,
    ) -> Result<Vec<AlertEvent>, StoreError> {
        let matching = self
            .read_state(watcher_id, |state| {
                state
                    .alerts
                    .iter()
                    .filter(|a| filter.scope.matches(&a.protocol_id, &a.pool_id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(newest(matching, self.read_limit(filter.limit)))
    }

    async fn commit_cycle(
        &self,
        watcher_id: &str,
        expected_version: u64,
        batch: &CycleBatch,
        ran_at: i64,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock_state(watcher_id);
        let mut record = self
            .watchers
            .get_mut(watcher_id)
            .ok_or_else(|| StoreError::UnknownWatcher(watcher_id.to_string()))?;

        if record.versions.last().map(|v| v.version) != Some(expected_version) {
            return Ok(false);
        }

        for snapshot in &batch.snapshots {
            state.upsert(snapshot);
        }
        state.deltas.extend(batch.deltas.iter().cloned());
        state.append_alerts(&batch.alerts);
        record.last_run_at = Some(ran_at);
        Ok(true)
    }
}

#[async_trait]
impl WatcherConfigStore for MemoryStore {
    async fn save(&self, watcher_id: &str, config: &WatcherConfig) -> Result<u64, StoreError> {
        Ok(self.push_version(watcher_id, config))
    }

    async fn save_and_reset(&self, watcher_id: &str, config: &WatcherConfig) -> Result<u64, StoreError> {
        let mut state = self.lock_state(watcher_id);
        let version = self.push_version(watcher_id, config);
        self.clear(watcher_id, state.value_mut());
        Ok(version)
    }

    async fn latest(&self, watcher_id: &str) -> Result<Option<VersionedConfig>, StoreError> {
        Ok(self
            .watchers
            .get(watcher_id)
            .and_then(|record| record.versions.last().cloned()))
    }

    async fn list_watchers(&self) -> Result<Vec<WatcherEntry>, StoreError> {
        let mut entries: Vec<WatcherEntry> = self
            .watchers
            .iter()
            .filter_map(|record| {
                let latest = record.versions.last()?;
                Some(WatcherEntry {
                    watcher_id: record.key().clone(),
                    status: record.status,
                    config: latest.config.clone(),
                    version: latest.version,
                    last_run_at: record.last_run_at,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.watcher_id.cmp(&b.watcher_id));
        Ok(entries)
    }

    async fn set_status(&self, watcher_id: &str, status: WatcherStatus) -> Result<(), StoreError> {
        let mut record = self
            .watchers
            .get_mut(watcher_id)
            .ok_or_else(|| StoreError::UnknownWatcher(watcher_id.to_string()))?;
        record.status = status;
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        watcher_id: &str,
        owner: &str,
        ttl_ms: i64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.watchers.get_mut(watcher_id) else {
            return Ok(false);
        };
        let free = match &record.lease {
            None => true,
            Some((holder, expires_at)) => holder == owner || *expires_at < now,
        };
        if free {
            record.lease = Some((owner.to_string(), now + ttl_ms));
        }
        Ok(free)
    }

    async fn release_lease(&self, watcher_id: &str, owner: &str) -> Result<(), StoreError> {
        if let Some(mut record) = self.watchers.get_mut(watcher_id) {
            if matches!(&record.lease, Some((holder, _)) if holder == owner) {
                record.lease = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_core::{ChangeDirection, MetricKind};

    fn snapshot(pool_id: &str, tvl: f64, timestamp: i64) -> PoolMetricSnapshot {
        PoolMetricSnapshot {
            protocol_id: "aave-v3".to_string(),
            pool_id: pool_id.to_string(),
            chain_id: 1,
            address: "0x0000000000000000000000000000000000000001".to_string(),
            block_number: None,
            timestamp,
            apy: None,
            tvl: Some(tvl),
            raw: None,
        }
    }

    fn alert(n: usize) -> AlertEvent {
        AlertEvent {
            id: format!("alert::r::aave-v3::usdc::{}", n),
            protocol_id: "aave-v3".to_string(),
            pool_id: "usdc".to_string(),
            metric: MetricKind::Tvl,
            rule_id: "r".to_string(),
            triggered_at: n as i64,
            block_number: Some(n as u64),
            change_direction: ChangeDirection::Increase,
            change_amount: 1.0,
            percent_change: None,
            message: String::new(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn alert_history_is_capped_in_arrival_order() {
        let store = MemoryStore::default();
        let alerts: Vec<AlertEvent> = (0..300).map(alert).collect();
        store.append_alerts("w", &alerts).await.unwrap();

        let stored = store
            .alerts("w", &AlertsFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 256);
        assert_eq!(stored[0].triggered_at, 44);
        assert_eq!(stored[255].triggered_at, 299);
        assert!(stored.windows(2).all(|w| w[0].triggered_at < w[1].triggered_at));
    }

    #[tokio::test]
    async fn alert_ids_are_idempotent() {
        let store = MemoryStore::default();
        store.append_alerts("w", &[alert(1), alert(2)]).await.unwrap();
        store.append_alerts("w", &[alert(2), alert(3), alert(3)]).await.unwrap();
        let stored = store.alerts("w", &AlertsFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn alert_limit_keeps_newest() {
        let store = MemoryStore::default();
        let alerts: Vec<AlertEvent> = (0..10).map(alert).collect();
        store.append_alerts("w", &alerts).await.unwrap();
        let filter = AlertsFilter {
            limit: Some(3),
            ..Default::default()
        };
        let stored = store.alerts("w", &filter).await.unwrap();
        let ids: Vec<i64> = stored.iter().map(|a| a.triggered_at).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn latest_snapshot_lookup_ignores_case_and_stale_writes() {
        let store = MemoryStore::default();
        store
            .upsert_snapshots("w", &[snapshot("USDC", 100.0, 10), snapshot("weth", 5.0, 10)])
            .await
            .unwrap();
        store.upsert_snapshots("w", &[snapshot("usdc", 90.0, 5)]).await.unwrap();

        let latest = store.latest_snapshot("w", "AAVE-V3", "usdc").await.unwrap().unwrap();
        assert_eq!(latest.tvl, Some(100.0));

        let all = store.latest_snapshots("w", &MetricsFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let weth = store
            .latest_snapshots("w", &MetricsFilter::for_pool("aave-v3", "WETH"))
            .await
            .unwrap();
        assert_eq!(weth.len(), 1);
    }

    fn config() -> WatcherConfig {
        WatcherConfig {
            protocol_ids: vec!["aave-v3".to_string()],
            pools: vec![],
            threshold_rules: vec![],
            polling_interval_ms: None,
        }
    }

    #[tokio::test]
    async fn watchers_are_isolated_and_reset_clears_everything() {
        let store = MemoryStore::default();
        let batch = CycleBatch {
            snapshots: vec![snapshot("usdc", 1.0, 1)],
            deltas: vec![],
            alerts: vec![alert(1)],
        };
        store.save("a", &config()).await.unwrap();
        store.save("b", &config()).await.unwrap();
        assert!(store.commit_cycle("a", 1, &batch, 10).await.unwrap());
        assert!(store.commit_cycle("b", 1, &batch, 10).await.unwrap());

        store.reset_state("a").await.unwrap();
        assert!(store.latest_snapshots("a", &MetricsFilter::default()).await.unwrap().is_empty());
        assert!(store.alerts("a", &AlertsFilter::default()).await.unwrap().is_empty());
        assert_eq!(store.alerts("b", &AlertsFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_cycle_is_rejected_after_reconfigure() {
        let store = MemoryStore::default();
        let batch = CycleBatch {
            snapshots: vec![snapshot("usdc", 1.0, 1)],
            deltas: vec![],
            alerts: vec![alert(1)],
        };
        store.save("w", &config()).await.unwrap();
        assert!(store.commit_cycle("w", 1, &batch, 10).await.unwrap());

        assert_eq!(store.save_and_reset("w", &config()).await.unwrap(), 2);
        assert!(store.latest_snapshots("w", &MetricsFilter::default()).await.unwrap().is_empty());
        assert_eq!(store.list_watchers().await.unwrap()[0].last_run_at, None);

        assert!(!store.commit_cycle("w", 1, &batch, 20).await.unwrap());
        assert!(store.latest_snapshots("w", &MetricsFilter::default()).await.unwrap().is_empty());
        assert!(store.alerts("w", &AlertsFilter::default()).await.unwrap().is_empty());
        assert_eq!(store.list_watchers().await.unwrap()[0].last_run_at, None);

        assert!(store.commit_cycle("w", 2, &batch, 30).await.unwrap());
        assert_eq!(store.list_watchers().await.unwrap()[0].last_run_at, Some(30));
    }

    #[tokio::test]
    async fn commit_requires_known_watcher() {
        let store = MemoryStore::default();
        let err = store
            .commit_cycle("ghost", 1, &CycleBatch::default(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownWatcher(id) if id == "ghost"));
    }
}
