use async_trait::async_trait;
use pool_core::{
    pool_key, AlertEvent, AlertsFilter, DeltaSnapshot, MetricsFilter, PoolMetricSnapshot,
};
use chrono::Utc;
use sqlx::AnyConnection;

use super::rows::{AlertRow, DeltaRow, MetricRow, ALERT_COLUMNS, DELTA_COLUMNS, METRIC_COLUMNS};
use super::{to_db_int, SqlStore};
use crate::store::{CycleBatch, MetricsStore};
use crate::StoreError;

/// `WHERE` clause for a watcher plus optional case-insensitive pool filter.
fn scoped_where(filter: &MetricsFilter) -> (String, Vec<String>) {
    let mut clause = String::from("watcher_id = ?");
    let mut binds = Vec::new();
    if let Some(protocol_id) = &filter.protocol_id {
        clause.push_str(" AND LOWER(protocol_id) = ?");
        binds.push(protocol_id.to_lowercase());
    }
    if let Some(pool_id) = &filter.pool_id {
        clause.push_str(" AND LOWER(pool_id) = ?");
        binds.push(pool_id.to_lowercase());
    }
    (clause, binds)
}

impl SqlStore {
    async fn insert_snapshot(
        &self,
        conn: &mut AnyConnection,
        watcher_id: &str,
        snapshot: &PoolMetricSnapshot,
    ) -> Result<(), StoreError> {
        let block_number = snapshot
            .block_number
            .map(|b| to_db_int(b, "block number"))
            .transpose()?;
        let raw = snapshot.raw.as_ref().map(serde_json::to_string).transpose()?;

        let query = self.dialect.sql(
            "INSERT INTO watcher_metrics (
                watcher_id, pool_key, protocol_id, pool_id, chain_id, address,
                block_number, timestamp_ms, apy, tvl, raw
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (watcher_id, pool_key, block_number) DO UPDATE SET
                protocol_id = excluded.protocol_id,
                pool_id = excluded.pool_id,
                chain_id = excluded.chain_id,
                address = excluded.address,
                timestamp_ms = excluded.timestamp_ms,
                apy = excluded.apy,
                tvl = excluded.tvl,
                raw = excluded.raw",
        );
        sqlx::query(&query)
            .bind(watcher_id)
            .bind(snapshot.key())
            .bind(&snapshot.protocol_id)
            .bind(&snapshot.pool_id)
            .bind(to_db_int(snapshot.chain_id, "chain id")?)
            .bind(&snapshot.address)
            .bind(block_number)
            .bind(snapshot.timestamp)
            .bind(snapshot.apy)
            .bind(snapshot.tvl)
            .bind(raw)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn insert_delta(
        &self,
        conn: &mut AnyConnection,
        watcher_id: &str,
        delta: &DeltaSnapshot,
    ) -> Result<(), StoreError> {
        let block_number = delta
            .block_number
            .map(|b| to_db_int(b, "block number"))
            .transpose()?;
        let query = self.dialect.sql(
            "INSERT INTO watcher_deltas (
                watcher_id, protocol_id, pool_id, metric, previous_value, current_value,
                absolute_change, percent_change, timestamp_ms, block_number
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        );
        sqlx::query(&query)
            .bind(watcher_id)
            .bind(&delta.protocol_id)
            .bind(&delta.pool_id)
            .bind(delta.metric.as_str())
            .bind(delta.previous)
            .bind(delta.current)
            .bind(delta.absolute_change)
            .bind(delta.percent_change)
            .bind(delta.timestamp)
            .bind(block_number)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn insert_alert(
        &self,
        conn: &mut AnyConnection,
        watcher_id: &str,
        alert: &AlertEvent,
    ) -> Result<(), StoreError> {
        let block_number = alert
            .block_number
            .map(|b| to_db_int(b, "block number"))
            .transpose()?;
        let metadata = alert.metadata.as_ref().map(serde_json::to_string).transpose()?;
        let query = self.dialect.sql(
            "INSERT INTO watcher_alerts (
                watcher_id, alert_id, protocol_id, pool_id, metric, rule_id, triggered_at_ms,
                block_number, change_direction, change_amount, percent_change, message, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (watcher_id, alert_id) DO NOTHING",
        );
        sqlx::query(&query)
            .bind(watcher_id)
            .bind(&alert.id)
            .bind(&alert.protocol_id)
            .bind(&alert.pool_id)
            .bind(alert.metric.as_str())
            .bind(&alert.rule_id)
            .bind(alert.triggered_at)
            .bind(block_number)
            .bind(alert.change_direction.as_str())
            .bind(alert.change_amount)
            .bind(alert.percent_change)
            .bind(&alert.message)
            .bind(metadata)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Trim history to the configured capacity, oldest rows first.
    async fn prune(
        &self,
        conn: &mut AnyConnection,
        watcher_id: &str,
        pool_keys: &[String],
    ) -> Result<(), StoreError> {
        let cap = self.history_capacity();

        for table in ["watcher_deltas", "watcher_alerts"] {
            let query = self.dialect.sql(&format!(
                "DELETE FROM {table} WHERE watcher_id = ? AND id NOT IN (
                    SELECT id FROM {table} WHERE watcher_id = ? ORDER BY id DESC LIMIT ?
                )"
            ));
            sqlx::query(&query)
                .bind(watcher_id)
                .bind(watcher_id)
                .bind(cap)
                .execute(&mut *conn)
                .await?;
        }

        let query = self.dialect.sql(
            "DELETE FROM watcher_metrics WHERE watcher_id = ? AND pool_key = ? AND id NOT IN (
                SELECT id FROM watcher_metrics WHERE watcher_id = ? AND pool_key = ?
                ORDER BY timestamp_ms DESC, id DESC LIMIT ?
            )",
        );
        for key in pool_keys {
            sqlx::query(&query)
                .bind(watcher_id)
                .bind(key)
                .bind(watcher_id)
                .bind(key)
                .bind(cap)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    /// Drop every history row of a watcher and forget its last run.
    pub(super) async fn clear_history(
        &self,
        conn: &mut AnyConnection,
        watcher_id: &str,
    ) -> Result<(), StoreError> {
        for table in ["watcher_metrics", "watcher_deltas", "watcher_alerts"] {
            let query = self
                .dialect
                .sql(&format!("DELETE FROM {table} WHERE watcher_id = ?"));
            sqlx::query(&query).bind(watcher_id).execute(&mut *conn).await?;
        }
        let query = self
            .dialect
            .sql("UPDATE watchers SET last_run_at_ms = NULL WHERE watcher_id = ?");
        sqlx::query(&query).bind(watcher_id).execute(&mut *conn).await?;
        Ok(())
    }

    fn batch_keys(snapshots: &[PoolMetricSnapshot]) -> Vec<String> {
        let mut keys: Vec<String> = snapshots.iter().map(PoolMetricSnapshot::key).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

#[async_trait]
impl MetricsStore for SqlStore {
    async fn reset_state(&self, watcher_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        self.clear_history(&mut tx, watcher_id).await?;
        tx.commit().await?;

        tracing::debug!(watcher_id, "Cleared watcher history");
        Ok(())
    }

    async fn upsert_snapshots(
        &self,
        watcher_id: &str,
        snapshots: &[PoolMetricSnapshot],
    ) -> Result<(), StoreError> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for snapshot in snapshots {
            self.insert_snapshot(&mut tx, watcher_id, snapshot).await?;
        }
        self.prune(&mut tx, watcher_id, &Self::batch_keys(snapshots)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        watcher_id: &str,
        protocol_id: &str,
        pool_id: &str,
    ) -> Result<Option<PoolMetricSnapshot>, StoreError> {
        let query = self.dialect.sql(&format!(
            "SELECT {METRIC_COLUMNS} FROM watcher_metrics
             WHERE watcher_id = ? AND pool_key = ?
             ORDER BY timestamp_ms DESC, id DESC LIMIT 1"
        ));
        let row: Option<MetricRow> = sqlx::query_as(&query)
            .bind(watcher_id)
            .bind(pool_key(protocol_id, pool_id))
            .fetch_optional(&self.pool)
            .await?;
        row.map(MetricRow::into_snapshot).transpose()
    }

    async fn latest_snapshots(
        &self,
        watcher_id: &str,
        filter: &MetricsFilter,
    ) -> Result<Vec<PoolMetricSnapshot>, StoreError> {
        let (clause, binds) = scoped_where(filter);
        let query = self.dialect.sql(&format!(
            "SELECT {METRIC_COLUMNS}, pool_key FROM watcher_metrics m
             WHERE {clause} AND timestamp_ms = (
                SELECT MAX(x.timestamp_ms) FROM watcher_metrics x
                WHERE x.watcher_id = m.watcher_id AND x.pool_key = m.pool_key
             )
             ORDER BY pool_key, id DESC"
        ));
        let mut q = sqlx::query_as::<_, MetricRow>(&query).bind(watcher_id);
        for value in binds {
            q = q.bind(value);
        }
        let rows = q.fetch_all(&self.pool).await?;

        // Several rows can share the max timestamp; keep the newest per pool.
        let mut snapshots: Vec<PoolMetricSnapshot> = Vec::with_capacity(rows.len());
        for row in rows {
            let snapshot = row.into_snapshot()?;
            if snapshots.last().map(|s| s.key()) != Some(snapshot.key()) {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    async fn append_deltas(
        &self,
        watcher_id: &str,
        deltas: &[DeltaSnapshot],
    ) -> Result<(), StoreError> {
        if deltas.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for delta in deltas {
            self.insert_delta(&mut tx, watcher_id, delta).await?;
        }
        self.prune(&mut tx, watcher_id, &[]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn deltas(
        &self,
        watcher_id: &str,
        filter: &MetricsFilter,
        limit: Option<usize>,
    ) -> Result<Vec<DeltaSnapshot>, StoreError> {
        let (clause, binds) = scoped_where(filter);
        let query = self.dialect.sql(&format!(
            "SELECT {DELTA_COLUMNS} FROM watcher_deltas WHERE {clause} ORDER BY id DESC LIMIT ?"
        ));
        let mut q = sqlx::query_as::<_, DeltaRow>(&query).bind(watcher_id);
        for value in binds {
            q = q.bind(value);
        }
        let rows = q.bind(self.read_limit(limit)).fetch_all(&self.pool).await?;
        rows.into_iter().rev().map(DeltaRow::into_delta).collect()
    }

    async fn append_alerts(
        &self,
        watcher_id: &str,
        alerts: &[AlertEvent],
    ) -> Result<(), StoreError> {
        if alerts.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for alert in alerts {
            self.insert_alert(&mut tx, watcher_id, alert).await?;
        }
        self.prune(&mut tx, watcher_id, &[]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn alerts(
        &self,
        watcher_id: &str,
        filter: &AlertsFilter,
    ) -> Result<Vec<AlertEvent>, StoreError> {
        let (clause, binds) = scoped_where(&filter.scope);
        let query = self.dialect.sql(&format!(
            "SELECT {ALERT_COLUMNS} FROM watcher_alerts WHERE {clause} ORDER BY id DESC LIMIT ?"
        ));
        let mut q = sqlx::query_as::<_, AlertRow>(&query).bind(watcher_id);
        for value in binds {
            q = q.bind(value);
        }
        let rows = q.bind(self.read_limit(filter.limit)).fetch_all(&self.pool).await?;
        rows.into_iter().rev().map(AlertRow::into_alert).collect()
    }

    async fn commit_cycle(
        &self,
        watcher_id: &str,
        expected_version: u64,
        batch: &CycleBatch,
        ran_at: i64,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Writing the watcher row first serialises this commit against a
        // concurrent config save, which updates the same row.
        let query = self
            .dialect
            .sql("UPDATE watchers SET last_run_at_ms = ?, updated_at_ms = ? WHERE watcher_id = ?");
        let result = sqlx::query(&query)
            .bind(ran_at)
            .bind(Utc::now().timestamp_millis())
            .bind(watcher_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownWatcher(watcher_id.to_string()));
        }

        let current = self.latest_version(&mut tx, watcher_id).await?;
        if current != to_db_int(expected_version, "config version")? {
            tx.rollback().await?;
            tracing::debug!(watcher_id, expected_version, current, "Discarded stale poll cycle");
            return Ok(false);
        }

        for snapshot in &batch.snapshots {
            self.insert_snapshot(&mut tx, watcher_id, snapshot).await?;
        }
        for delta in &batch.deltas {
            self.insert_delta(&mut tx, watcher_id, delta).await?;
        }
        for alert in &batch.alerts {
            self.insert_alert(&mut tx, watcher_id, alert).await?;
        }
        if !batch.is_empty() {
            self.prune(&mut tx, watcher_id, &Self::batch_keys(&batch.snapshots))
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(
            watcher_id,
            snapshots = batch.snapshots.len(),
            deltas = batch.deltas.len(),
            alerts = batch.alerts.len(),
            "Committed poll cycle"
        );
        Ok(true)
    }
}
