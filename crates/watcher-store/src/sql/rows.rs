use pool_core::{AlertEvent, ChangeDirection, DeltaSnapshot, MetricKind, PoolMetricSnapshot};

use super::from_db_int;
use crate::StoreError;

pub(crate) const METRIC_COLUMNS: &str =
    "protocol_id, pool_id, chain_id, address, block_number, timestamp_ms, apy, tvl, raw";

pub(crate) const DELTA_COLUMNS: &str = "protocol_id, pool_id, metric, previous_value, current_value, \
     absolute_change, percent_change, timestamp_ms, block_number";

pub(crate) const ALERT_COLUMNS: &str = "alert_id, protocol_id, pool_id, metric, rule_id, triggered_at_ms, \
     block_number, change_direction, change_amount, percent_change, message, metadata";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MetricRow {
    pub protocol_id: String,
    pub pool_id: String,
    pub chain_id: i64,
    pub address: String,
    pub block_number: Option<i64>,
    pub timestamp_ms: i64,
    pub apy: Option<f64>,
    pub tvl: Option<f64>,
    pub raw: Option<String>,
}

impl MetricRow {
    pub fn into_snapshot(self) -> Result<PoolMetricSnapshot, StoreError> {
        Ok(PoolMetricSnapshot {
            protocol_id: self.protocol_id,
            pool_id: self.pool_id,
            chain_id: from_db_int(self.chain_id, "chain id")?,
            address: self.address,
            block_number: self
                .block_number
                .map(|b| from_db_int(b, "block number"))
                .transpose()?,
            timestamp: self.timestamp_ms,
            apy: self.apy,
            tvl: self.tvl,
            raw: self.raw.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DeltaRow {
    pub protocol_id: String,
    pub pool_id: String,
    pub metric: String,
    pub previous_value: f64,
    pub current_value: f64,
    pub absolute_change: f64,
    pub percent_change: Option<f64>,
    pub timestamp_ms: i64,
    pub block_number: Option<i64>,
}

impl DeltaRow {
    pub fn into_delta(self) -> Result<DeltaSnapshot, StoreError> {
        Ok(DeltaSnapshot {
            metric: parse_metric(&self.metric)?,
            protocol_id: self.protocol_id,
            pool_id: self.pool_id,
            previous: self.previous_value,
            current: self.current_value,
            absolute_change: self.absolute_change,
            percent_change: self.percent_change,
            timestamp: self.timestamp_ms,
            block_number: self
                .block_number
                .map(|b| from_db_int(b, "block number"))
                .transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AlertRow {
    pub alert_id: String,
    pub protocol_id: String,
    pub pool_id: String,
    pub metric: String,
    pub rule_id: String,
    pub triggered_at_ms: i64,
    pub block_number: Option<i64>,
    pub change_direction: String,
    pub change_amount: f64,
    pub percent_change: Option<f64>,
    pub message: String,
    pub metadata: Option<String>,
}

impl AlertRow {
    pub fn into_alert(self) -> Result<AlertEvent, StoreError> {
        let change_direction = ChangeDirection::parse(&self.change_direction).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown change direction '{}'", self.change_direction))
        })?;
        Ok(AlertEvent {
            metric: parse_metric(&self.metric)?,
            id: self.alert_id,
            protocol_id: self.protocol_id,
            pool_id: self.pool_id,
            rule_id: self.rule_id,
            triggered_at: self.triggered_at_ms,
            block_number: self
                .block_number
                .map(|b| from_db_int(b, "block number"))
                .transpose()?,
            change_direction,
            change_amount: self.change_amount,
            percent_change: self.percent_change,
            message: self.message,
            metadata: self.metadata.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct WatcherRow {
    pub watcher_id: String,
    pub status: String,
    pub last_run_at_ms: Option<i64>,
    pub version: i64,
    pub config: String,
}

fn parse_metric(value: &str) -> Result<MetricKind, StoreError> {
    MetricKind::parse(value).ok_or_else(|| StoreError::Corrupt(format!("unknown metric '{}'", value)))
}
