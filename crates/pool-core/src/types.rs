use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form JSON object attached to pools, rules, snapshots and alerts.
pub type JsonMap = Map<String, Value>;

/// Metric tracked per pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Tvl,
    Apy,
}

impl MetricKind {
    /// Metrics in the order deltas are produced.
    pub const ALL: [MetricKind; 2] = [MetricKind::Tvl, MetricKind::Apy];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Tvl => "tvl",
            MetricKind::Apy => "apy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tvl" => Some(MetricKind::Tvl),
            "apy" => Some(MetricKind::Apy),
            _ => None,
        }
    }
}

/// How a threshold is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Percent,
    Absolute,
}

/// Direction a rule listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    Increase,
    Decrease,
    #[default]
    Both,
}

impl RuleDirection {
    pub fn accepts(&self, direction: ChangeDirection) -> bool {
        match self {
            RuleDirection::Both => true,
            RuleDirection::Increase => direction == ChangeDirection::Increase,
            RuleDirection::Decrease => direction == ChangeDirection::Decrease,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleDirection::Increase => "increase",
            RuleDirection::Decrease => "decrease",
            RuleDirection::Both => "both",
        }
    }
}

/// Observed direction of a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

impl ChangeDirection {
    /// Zero counts as an increase.
    pub fn from_change(absolute_change: f64) -> Self {
        if absolute_change >= 0.0 {
            ChangeDirection::Increase
        } else {
            ChangeDirection::Decrease
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeDirection::Increase => "increase",
            ChangeDirection::Decrease => "decrease",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "increase" => Some(ChangeDirection::Increase),
            "decrease" => Some(ChangeDirection::Decrease),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    #[default]
    Blocks,
    Minutes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub direction: RuleDirection,
    /// Always strictly positive once validated.
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleWindow {
    #[serde(rename = "type")]
    pub window_type: WindowType,
    pub value: u32,
}

impl Default for RuleWindow {
    fn default() -> Self {
        Self {
            window_type: WindowType::Blocks,
            value: 1,
        }
    }
}

/// Optional scoping of a rule to a subset of pools
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_ids: Option<Vec<String>>,
}

impl RuleScope {
    /// Each list that is present must contain the id (case-insensitive).
    pub fn matches(&self, protocol_id: &str, pool_id: &str) -> bool {
        let listed = |ids: &Option<Vec<String>>, value: &str| match ids {
            Some(ids) => ids.iter().any(|id| id.eq_ignore_ascii_case(value)),
            None => true,
        };
        listed(&self.protocol_ids, protocol_id) && listed(&self.pool_ids, pool_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRule {
    pub id: String,
    pub metric: MetricKind,
    pub change: ThresholdChange,
    pub window: RuleWindow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<RuleScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
}

impl ThresholdRule {
    pub fn applies_to_pool(&self, protocol_id: &str, pool_id: &str) -> bool {
        self.applies_to
            .as_ref()
            .map(|scope| scope.matches(protocol_id, pool_id))
            .unwrap_or(true)
    }
}

/// A tracked pool. `(protocol_id, id)` is unique within a watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub id: String,
    pub protocol_id: String,
    pub chain_id: u64,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    pub protocol_ids: Vec<String>,
    pub pools: Vec<PoolConfig>,
    pub threshold_rules: Vec<ThresholdRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_interval_ms: Option<u64>,
}

/// A config together with the version it was saved under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedConfig {
    pub config: WatcherConfig,
    pub version: u64,
}

/// Lifecycle state of a watcher identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherStatus {
    #[default]
    Active,
    Paused,
    Disabled,
}

impl WatcherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherStatus::Active => "active",
            WatcherStatus::Paused => "paused",
            WatcherStatus::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(WatcherStatus::Active),
            "paused" => Some(WatcherStatus::Paused),
            "disabled" => Some(WatcherStatus::Disabled),
            _ => None,
        }
    }
}

/// One point-in-time reading of a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetricSnapshot {
    pub protocol_id: String,
    pub pool_id: String,
    pub chain_id: u64,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "crate::block_number")]
    pub block_number: Option<u64>,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(default)]
    pub apy: Option<f64>,
    #[serde(default)]
    pub tvl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<JsonMap>,
}

impl PoolMetricSnapshot {
    pub fn metric(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Tvl => self.tvl,
            MetricKind::Apy => self.apy,
        }
    }

    pub fn key(&self) -> String {
        pool_key(&self.protocol_id, &self.pool_id)
    }
}

/// Change of one metric between two consecutive snapshots of a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSnapshot {
    pub protocol_id: String,
    pub pool_id: String,
    pub metric: MetricKind,
    pub previous: f64,
    pub current: f64,
    pub absolute_change: f64,
    /// `None` when the previous value was zero.
    pub percent_change: Option<f64>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "crate::block_number")]
    pub block_number: Option<u64>,
}

/// A triggered threshold rule. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub id: String,
    pub protocol_id: String,
    pub pool_id: String,
    pub metric: MetricKind,
    pub rule_id: String,
    pub triggered_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "crate::block_number")]
    pub block_number: Option<u64>,
    pub change_direction: ChangeDirection,
    pub change_amount: f64,
    pub percent_change: Option<f64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Read filter shared by metrics, deltas and alerts (case-insensitive)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
}

impl MetricsFilter {
    pub fn for_pool(protocol_id: impl Into<String>, pool_id: impl Into<String>) -> Self {
        Self {
            protocol_id: Some(protocol_id.into()),
            pool_id: Some(pool_id.into()),
        }
    }

    pub fn matches(&self, protocol_id: &str, pool_id: &str) -> bool {
        let protocol_ok = self
            .protocol_id
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case(protocol_id))
            .unwrap_or(true);
        let pool_ok = self
            .pool_id
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case(pool_id))
            .unwrap_or(true);
        protocol_ok && pool_ok
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsFilter {
    #[serde(flatten)]
    pub scope: MetricsFilter,
    /// Keep only the newest `limit` alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Context handed to an adapter for one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchContext {
    /// Tick timestamp in epoch milliseconds
    pub timestamp: i64,
    pub block_tag: Option<u64>,
}

/// Normalized `(protocol_id, pool_id)` lookup key.
pub fn pool_key(protocol_id: &str, pool_id: &str) -> String {
    format!(
        "{}::{}",
        protocol_id.to_ascii_lowercase(),
        pool_id.to_ascii_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_matching_is_case_insensitive() {
        let scope = RuleScope {
            protocol_ids: Some(vec!["Aave-V3".to_string()]),
            pool_ids: None,
        };
        assert!(scope.matches("aave-v3", "usdc"));
        assert!(!scope.matches("curve", "usdc"));

        let scope = RuleScope {
            protocol_ids: Some(vec!["aave-v3".to_string()]),
            pool_ids: Some(vec!["USDC".to_string(), "weth".to_string()]),
        };
        assert!(scope.matches("AAVE-V3", "usdc"));
        assert!(!scope.matches("aave-v3", "dai"));
    }

    #[test]
    fn rule_direction_accepts() {
        assert!(RuleDirection::Both.accepts(ChangeDirection::Decrease));
        assert!(RuleDirection::Increase.accepts(ChangeDirection::Increase));
        assert!(!RuleDirection::Increase.accepts(ChangeDirection::Decrease));
        assert_eq!(ChangeDirection::from_change(0.0), ChangeDirection::Increase);
        assert_eq!(ChangeDirection::from_change(-0.5), ChangeDirection::Decrease);
    }

    #[test]
    fn snapshot_wire_format() {
        let snapshot = PoolMetricSnapshot {
            protocol_id: "aave-v3".to_string(),
            pool_id: "usdc".to_string(),
            chain_id: 8453,
            address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string(),
            block_number: Some(12_345_678),
            timestamp: 1_700_000_000_000,
            apy: Some(4.2),
            tvl: None,
            raw: None,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["blockNumber"], "12345678");
        assert_eq!(value["poolId"], "usdc");
        assert!(value["tvl"].is_null());

        let back: PoolMetricSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn filter_matches() {
        let filter = MetricsFilter {
            protocol_id: Some("AAVE-v3".to_string()),
            pool_id: None,
        };
        assert!(filter.matches("aave-v3", "anything"));
        assert!(!filter.matches("curve", "anything"));
        assert!(MetricsFilter::default().matches("x", "y"));
    }
}
