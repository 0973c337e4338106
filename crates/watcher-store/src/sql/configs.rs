use async_trait::async_trait;
use chrono::Utc;
use pool_core::{VersionedConfig, WatcherConfig, WatcherStatus};
use sqlx::AnyConnection;

use super::rows::WatcherRow;
use super::{from_db_int, to_db_int, SqlStore};
use crate::store::{WatcherConfigStore, WatcherEntry};
use crate::StoreError;

fn parse_status(value: &str) -> Result<WatcherStatus, StoreError> {
    WatcherStatus::parse(value)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown watcher status '{}'", value)))
}

impl SqlStore {
    pub(super) async fn latest_version(
        &self,
        conn: &mut AnyConnection,
        watcher_id: &str,
    ) -> Result<i64, StoreError> {
        let query = self
            .dialect
            .sql("SELECT COALESCE(MAX(version), 0) FROM watcher_configs WHERE watcher_id = ?");
        let (current,): (i64,) = sqlx::query_as(&query)
            .bind(watcher_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(current)
    }

    /// Upsert the watcher row and append the next config version.
    async fn insert_version(
        &self,
        conn: &mut AnyConnection,
        watcher_id: &str,
        config: &WatcherConfig,
    ) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp_millis();
        let interval = config
            .polling_interval_ms
            .map(|ms| to_db_int(ms, "polling interval"))
            .transpose()?;
        let payload = serde_json::to_string(config)?;

        let query = self.dialect.sql(
            "INSERT INTO watchers (watcher_id, status, polling_interval_ms, created_at_ms, updated_at_ms)
             VALUES (?, 'active', ?, ?, ?)
             ON CONFLICT (watcher_id) DO UPDATE SET
                polling_interval_ms = excluded.polling_interval_ms,
                updated_at_ms = excluded.updated_at_ms",
        );
        sqlx::query(&query)
            .bind(watcher_id)
            .bind(interval)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        let version = self.latest_version(&mut *conn, watcher_id).await? + 1;

        let query = self.dialect.sql(
            "INSERT INTO watcher_configs (watcher_id, version, config, created_at_ms) VALUES (?, ?, ?, ?)",
        );
        sqlx::query(&query)
            .bind(watcher_id)
            .bind(version)
            .bind(payload)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        Ok(version)
    }
}

#[async_trait]
impl WatcherConfigStore for SqlStore {
    async fn save(&self, watcher_id: &str, config: &WatcherConfig) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let version = self.insert_version(&mut tx, watcher_id, config).await?;
        tx.commit().await?;

        tracing::info!(watcher_id, version, "Saved watcher config");
        from_db_int(version, "config version")
    }

    async fn save_and_reset(&self, watcher_id: &str, config: &WatcherConfig) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let version = self.insert_version(&mut tx, watcher_id, config).await?;
        self.clear_history(&mut tx, watcher_id).await?;
        tx.commit().await?;

        tracing::info!(watcher_id, version, "Saved watcher config and cleared history");
        from_db_int(version, "config version")
    }

    async fn latest(&self, watcher_id: &str) -> Result<Option<VersionedConfig>, StoreError> {
        let query = self.dialect.sql(
            "SELECT version, config FROM watcher_configs
             WHERE watcher_id = ? ORDER BY version DESC LIMIT 1",
        );
        let row: Option<(i64, String)> = sqlx::query_as(&query)
            .bind(watcher_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((version, config)) => Ok(Some(VersionedConfig {
                config: serde_json::from_str(&config)?,
                version: from_db_int(version, "config version")?,
            })),
            None => Ok(None),
        }
    }

    async fn list_watchers(&self) -> Result<Vec<WatcherEntry>, StoreError> {
        let rows: Vec<WatcherRow> = sqlx::query_as(
            "SELECT w.watcher_id, w.status, w.last_run_at_ms, c.version, c.config
             FROM watchers w
             JOIN watcher_configs c ON c.watcher_id = w.watcher_id
             WHERE c.version = (
                SELECT MAX(x.version) FROM watcher_configs x WHERE x.watcher_id = w.watcher_id
             )
             ORDER BY w.watcher_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<WatcherEntry, StoreError> {
                Ok(WatcherEntry {
                    status: parse_status(&row.status)?,
                    config: serde_json::from_str(&row.config)?,
                    version: from_db_int(row.version, "config version")?,
                    last_run_at: row.last_run_at_ms,
                    watcher_id: row.watcher_id,
                })
            })
            .collect()
    }

    async fn set_status(&self, watcher_id: &str, status: WatcherStatus) -> Result<(), StoreError> {
        let query = self
            .dialect
            .sql("UPDATE watchers SET status = ?, updated_at_ms = ? WHERE watcher_id = ?");
        let result = sqlx::query(&query)
            .bind(status.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(watcher_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownWatcher(watcher_id.to_string()));
        }
        tracing::info!(watcher_id, status = status.as_str(), "Watcher status changed");
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        watcher_id: &str,
        owner: &str,
        ttl_ms: i64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let query = self.dialect.sql(
            "UPDATE watchers SET lease_owner = ?, lease_expires_at_ms = ?
             WHERE watcher_id = ?
               AND (lease_owner IS NULL OR lease_owner = ? OR lease_expires_at_ms < ?)",
        );
        let result = sqlx::query(&query)
            .bind(owner)
            .bind(now + ttl_ms)
            .bind(watcher_id)
            .bind(owner)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, watcher_id: &str, owner: &str) -> Result<(), StoreError> {
        let query = self.dialect.sql(
            "UPDATE watchers SET lease_owner = NULL, lease_expires_at_ms = NULL
             WHERE watcher_id = ? AND lease_owner = ?",
        );
        sqlx::query(&query)
            .bind(watcher_id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
