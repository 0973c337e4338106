//! Loosely typed watcher config input and its validation into a [`WatcherConfig`].
//!
//! Numeric fields are accepted as signed values so that out-of-range input is
//! reported as a validation issue instead of a deserialization failure.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    ChangeType, ConfigValidationError, JsonMap, MetricKind, PoolConfig, RuleDirection, RuleScope,
    RuleWindow, ThresholdChange, ThresholdRule, ValidationIssue, WatcherConfig, WindowType,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfigInput {
    pub id: String,
    pub protocol_id: String,
    pub chain_id: i64,
    pub address: String,
    #[serde(default)]
    pub metadata: Option<JsonMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdChangeInput {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default)]
    pub direction: RuleDirection,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleWindowInput {
    #[serde(rename = "type", default)]
    pub window_type: WindowType,
    #[serde(default = "default_window_value")]
    pub value: i64,
}

fn default_window_value() -> i64 {
    1
}

impl Default for RuleWindowInput {
    fn default() -> Self {
        Self {
            window_type: WindowType::Blocks,
            value: default_window_value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRuleInput {
    pub id: String,
    pub metric: MetricKind,
    pub change: ThresholdChangeInput,
    #[serde(default)]
    pub window: RuleWindowInput,
    #[serde(default)]
    pub applies_to: Option<RuleScope>,
    #[serde(default)]
    pub metadata: Option<JsonMap>,
}

/// Raw `configure` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfigInput {
    pub protocol_ids: Vec<String>,
    pub pools: Vec<PoolConfigInput>,
    pub threshold_rules: Vec<ThresholdRuleInput>,
    #[serde(default)]
    pub polling_interval_ms: Option<i64>,
}

/// `0x` followed by exactly 20 bytes of hex.
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(digits) => digits.len() == 40 && hex::decode(digits).is_ok(),
        None => false,
    }
}

impl WatcherConfigInput {
    /// Validate every field, collecting all issues before failing.
    pub fn validate(&self) -> Result<WatcherConfig, ConfigValidationError> {
        let mut issues = Vec::new();

        if self.protocol_ids.is_empty() {
            issues.push(ValidationIssue::new("protocolIds", "Provide at least one protocol id."));
        }
        let mut protocol_ids: Vec<String> = Vec::with_capacity(self.protocol_ids.len());
        for (index, protocol_id) in self.protocol_ids.iter().enumerate() {
            if protocol_id.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("protocolIds[{}]", index),
                    "Protocol id must be a non-empty string.",
                ));
            } else if !protocol_ids.iter().any(|p| p == protocol_id) {
                protocol_ids.push(protocol_id.clone());
            }
        }

        if self.pools.is_empty() {
            issues.push(ValidationIssue::new("pools", "Configure at least one pool to monitor."));
        }
        let mut seen_pools = HashSet::new();
        let mut pools = Vec::with_capacity(self.pools.len());
        for (index, pool) in self.pools.iter().enumerate() {
            let field = |name: &str| format!("pools[{}].{}", index, name);
            let mut ok = true;
            if pool.id.is_empty() {
                issues.push(ValidationIssue::new(field("id"), "Pool id must be a non-empty string."));
                ok = false;
            }
            if pool.protocol_id.is_empty() {
                issues.push(ValidationIssue::new(field("protocolId"), "Protocol id must be provided."));
                ok = false;
            }
            if pool.chain_id <= 0 {
                issues.push(ValidationIssue::new(field("chainId"), "Chain id must be a positive integer."));
                ok = false;
            }
            if !is_valid_address(&pool.address) {
                issues.push(ValidationIssue::new(
                    field("address"),
                    "Expected a 0x-prefixed 20-byte address.",
                ));
                ok = false;
            }
            if ok && !seen_pools.insert(crate::pool_key(&pool.protocol_id, &pool.id)) {
                issues.push(ValidationIssue::new(
                    field("id"),
                    format!("Duplicate pool {} for protocol {}.", pool.id, pool.protocol_id),
                ));
                ok = false;
            }
            if ok {
                pools.push(PoolConfig {
                    id: pool.id.clone(),
                    protocol_id: pool.protocol_id.clone(),
                    chain_id: pool.chain_id as u64,
                    address: pool.address.clone(),
                    metadata: pool.metadata.clone(),
                });
            }
        }

        if self.threshold_rules.is_empty() {
            issues.push(ValidationIssue::new(
                "thresholdRules",
                "At least one threshold rule is required for alerting.",
            ));
        }
        let mut seen_rules = HashSet::new();
        let mut rules = Vec::with_capacity(self.threshold_rules.len());
        for (index, rule) in self.threshold_rules.iter().enumerate() {
            let field = |name: &str| format!("thresholdRules[{}].{}", index, name);
            let mut ok = true;
            if rule.id.is_empty() {
                issues.push(ValidationIssue::new(field("id"), "Rule id must be a non-empty string."));
                ok = false;
            } else if !seen_rules.insert(rule.id.clone()) {
                issues.push(ValidationIssue::new(field("id"), format!("Duplicate rule id {}.", rule.id)));
                ok = false;
            }
            if !(rule.change.amount.is_finite() && rule.change.amount > 0.0) {
                issues.push(ValidationIssue::new(
                    field("change.amount"),
                    "Change amount must be positive.",
                ));
                ok = false;
            }
            let window_value = u32::try_from(rule.window.value).ok().filter(|v| *v > 0);
            if window_value.is_none() {
                issues.push(ValidationIssue::new(
                    field("window.value"),
                    "Window value must be positive.",
                ));
                ok = false;
            }
            if let (true, Some(value)) = (ok, window_value) {
                rules.push(ThresholdRule {
                    id: rule.id.clone(),
                    metric: rule.metric,
                    change: ThresholdChange {
                        change_type: rule.change.change_type,
                        direction: rule.change.direction,
                        amount: rule.change.amount,
                    },
                    window: RuleWindow {
                        window_type: rule.window.window_type,
                        value,
                    },
                    applies_to: rule.applies_to.clone(),
                    metadata: rule.metadata.clone(),
                });
            }
        }

        let polling_interval_ms = match self.polling_interval_ms {
            Some(ms) if ms > 0 => Some(ms as u64),
            Some(_) => {
                issues.push(ValidationIssue::new(
                    "pollingIntervalMs",
                    "Polling interval must be a positive integer.",
                ));
                None
            }
            None => None,
        };

        if !issues.is_empty() {
            return Err(ConfigValidationError { issues });
        }

        Ok(WatcherConfig {
            protocol_ids,
            pools,
            threshold_rules: rules,
            polling_interval_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> serde_json::Value {
        json!({
            "protocolIds": ["aave-v3"],
            "pools": [{
                "id": "usdc",
                "protocolId": "aave-v3",
                "chainId": 8453,
                "address": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
            }],
            "thresholdRules": [{
                "id": "tvl-jump",
                "metric": "tvl",
                "change": { "type": "percent", "amount": 10 },
                "window": {}
            }]
        })
    }

    #[test]
    fn applies_defaults() {
        let input: WatcherConfigInput = serde_json::from_value(valid_payload()).unwrap();
        let config = input.validate().unwrap();

        let rule = &config.threshold_rules[0];
        assert_eq!(rule.change.direction, RuleDirection::Both);
        assert_eq!(rule.window.window_type, WindowType::Blocks);
        assert_eq!(rule.window.value, 1);
        assert_eq!(config.pools[0].chain_id, 8453);
        assert_eq!(config.polling_interval_ms, None);
    }

    #[test]
    fn collects_every_issue() {
        let mut payload = valid_payload();
        payload["pools"][0]["chainId"] = json!(0);
        payload["pools"][0]["address"] = json!("0x1234");
        payload["thresholdRules"][0]["change"]["amount"] = json!(0);
        payload["pollingIntervalMs"] = json!(-5);

        let input: WatcherConfigInput = serde_json::from_value(payload).unwrap();
        let err = input.validate().unwrap_err();
        let fields: Vec<&str> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "pools[0].chainId",
                "pools[0].address",
                "thresholdRules[0].change.amount",
                "pollingIntervalMs",
            ]
        );
    }

    #[test]
    fn rejects_empty_collections() {
        let input = WatcherConfigInput {
            protocol_ids: vec![],
            pools: vec![],
            threshold_rules: vec![],
            polling_interval_ms: None,
        };
        let err = input.validate().unwrap_err();
        assert_eq!(err.issues.len(), 3);
        assert!(err.to_string().contains("protocolIds"));
    }

    #[test]
    fn rejects_duplicate_pools_and_rules() {
        let mut payload = valid_payload();
        let pool = payload["pools"][0].clone();
        let mut shouting = pool.clone();
        shouting["id"] = json!("USDC");
        payload["pools"] = json!([pool, shouting]);
        let rule = payload["thresholdRules"][0].clone();
        payload["thresholdRules"] = json!([rule.clone(), rule]);

        let input: WatcherConfigInput = serde_json::from_value(payload).unwrap();
        let err = input.validate().unwrap_err();
        assert_eq!(err.issues.len(), 2);
    }

    #[test]
    fn address_format() {
        assert!(is_valid_address("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"));
        assert!(!is_valid_address("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"));
        assert!(!is_valid_address("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA0291Z"));
        assert!(!is_valid_address("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA029"));
    }

    #[test]
    fn deduplicates_protocol_ids() {
        let mut payload = valid_payload();
        payload["protocolIds"] = json!(["aave-v3", "curve", "aave-v3"]);
        let input: WatcherConfigInput = serde_json::from_value(payload).unwrap();
        let config = input.validate().unwrap();
        assert_eq!(config.protocol_ids, vec!["aave-v3", "curve"]);
    }
}
