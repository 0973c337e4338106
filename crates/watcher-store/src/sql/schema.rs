use super::SqlStore;
use crate::StoreError;

impl SqlStore {
    /// Create tables and indexes if they do not exist yet.
    pub async fn init_tables(&self) -> Result<(), StoreError> {
        let id = self.dialect.id_column();

        let statements = [
            "CREATE TABLE IF NOT EXISTS watchers (
                watcher_id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'active',
                polling_interval_ms BIGINT,
                last_run_at_ms BIGINT,
                lease_owner TEXT,
                lease_expires_at_ms BIGINT,
                created_at_ms BIGINT NOT NULL,
                updated_at_ms BIGINT NOT NULL
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS watcher_configs (
                watcher_id TEXT NOT NULL REFERENCES watchers(watcher_id) ON DELETE CASCADE,
                version BIGINT NOT NULL,
                config TEXT NOT NULL,
                created_at_ms BIGINT NOT NULL,
                PRIMARY KEY (watcher_id, version)
            )"
            .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS watcher_metrics (
                    id {id},
                    watcher_id TEXT NOT NULL,
                    pool_key TEXT NOT NULL,
                    protocol_id TEXT NOT NULL,
                    pool_id TEXT NOT NULL,
                    chain_id BIGINT NOT NULL,
                    address TEXT NOT NULL,
                    block_number BIGINT,
                    timestamp_ms BIGINT NOT NULL,
                    apy DOUBLE PRECISION,
                    tvl DOUBLE PRECISION,
                    raw TEXT,
                    UNIQUE (watcher_id, pool_key, block_number)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS watcher_deltas (
                    id {id},
                    watcher_id TEXT NOT NULL,
                    protocol_id TEXT NOT NULL,
                    pool_id TEXT NOT NULL,
                    metric TEXT NOT NULL,
                    previous_value DOUBLE PRECISION NOT NULL,
                    current_value DOUBLE PRECISION NOT NULL,
                    absolute_change DOUBLE PRECISION NOT NULL,
                    percent_change DOUBLE PRECISION,
                    timestamp_ms BIGINT NOT NULL,
                    block_number BIGINT
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS watcher_alerts (
                    id {id},
                    watcher_id TEXT NOT NULL,
                    alert_id TEXT NOT NULL,
                    protocol_id TEXT NOT NULL,
                    pool_id TEXT NOT NULL,
                    metric TEXT NOT NULL,
                    rule_id TEXT NOT NULL,
                    triggered_at_ms BIGINT NOT NULL,
                    block_number BIGINT,
                    change_direction TEXT NOT NULL,
                    change_amount DOUBLE PRECISION NOT NULL,
                    percent_change DOUBLE PRECISION,
                    message TEXT NOT NULL,
                    metadata TEXT,
                    UNIQUE (watcher_id, alert_id)
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_watcher_metrics_latest
                ON watcher_metrics (watcher_id, pool_key, timestamp_ms)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS idx_watcher_deltas_watcher
                ON watcher_deltas (watcher_id, id)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS idx_watcher_alerts_watcher
                ON watcher_alerts (watcher_id, id)"
                .to_string(),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::info!(dialect = ?self.dialect, "Watcher store tables ready");
        Ok(())
    }
}
