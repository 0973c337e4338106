//! Top-yield ranking over the latest snapshots of a watcher.

use std::cmp::Ordering;

use pool_core::{MetricKind, PoolMetricSnapshot};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YieldSort {
    #[default]
    Apy,
    Tvl,
}

impl YieldSort {
    fn metric(&self) -> MetricKind {
        match self {
            YieldSort::Apy => MetricKind::Apy,
            YieldSort::Tvl => MetricKind::Tvl,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopYieldsQuery {
    pub chain_id: u64,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Pools below this TVL (or without one) are dropped when greater than zero.
    #[serde(default)]
    pub min_tvl_usd: Option<f64>,
    #[serde(default)]
    pub sort_by: YieldSort,
}

impl TopYieldsQuery {
    pub fn for_chain(chain_id: u64) -> Self {
        Self {
            chain_id,
            limit: None,
            min_tvl_usd: None,
            sort_by: YieldSort::Apy,
        }
    }
}

/// Rank pools on one chain by APY or TVL, highest first. Pools missing the
/// sort metric go last.
pub fn top_yields(snapshots: &[PoolMetricSnapshot], query: &TopYieldsQuery) -> Vec<PoolMetricSnapshot> {
    let min_tvl = query.min_tvl_usd.unwrap_or(0.0);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let metric = query.sort_by.metric();

    let mut ranked: Vec<PoolMetricSnapshot> = snapshots
        .iter()
        .filter(|s| s.chain_id == query.chain_id)
        .filter(|s| min_tvl <= 0.0 || s.tvl.map(|tvl| tvl >= min_tvl).unwrap_or(false))
        .cloned()
        .collect();

    ranked.sort_by(|a, b| {
        let a = a.metric(metric).unwrap_or(f64::NEG_INFINITY);
        let b = b.metric(metric).unwrap_or(f64::NEG_INFINITY);
        b.partial_cmp(&a).unwrap_or(Ordering::Equal)
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(id: &str, chain_id: u64, apy: Option<f64>, tvl: Option<f64>) -> PoolMetricSnapshot {
        PoolMetricSnapshot {
            protocol_id: "aave-v3".to_string(),
            pool_id: id.to_string(),
            chain_id,
            address: "0x0000000000000000000000000000000000000001".to_string(),
            block_number: Some(1),
            timestamp: 0,
            apy,
            tvl,
            raw: None,
        }
    }

    fn ids(snapshots: &[PoolMetricSnapshot]) -> Vec<&str> {
        snapshots.iter().map(|s| s.pool_id.as_str()).collect()
    }

    #[test]
    fn ranks_by_apy_with_missing_values_last() {
        let snapshots = vec![
            pool("low", 1, Some(1.0), Some(10.0)),
            pool("none", 1, None, Some(10.0)),
            pool("high", 1, Some(9.0), Some(10.0)),
            pool("other-chain", 137, Some(50.0), Some(10.0)),
        ];
        let ranked = top_yields(&snapshots, &TopYieldsQuery::for_chain(1));
        assert_eq!(ids(&ranked), vec!["high", "low", "none"]);
    }

    #[test]
    fn applies_tvl_floor_and_limit() {
        let snapshots = vec![
            pool("a", 1, Some(3.0), Some(5_000_000.0)),
            pool("b", 1, Some(4.0), Some(500.0)),
            pool("c", 1, Some(2.0), None),
            pool("d", 1, Some(1.0), Some(9_000_000.0)),
        ];
        let query = TopYieldsQuery {
            chain_id: 1,
            limit: Some(1),
            min_tvl_usd: Some(1_000_000.0),
            sort_by: YieldSort::Tvl,
        };
        assert_eq!(ids(&top_yields(&snapshots, &query)), vec!["d"]);
    }
}
