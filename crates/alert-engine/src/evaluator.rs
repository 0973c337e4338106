//! Threshold-rule evaluation.

use pool_core::{
    AlertEvent, ChangeDirection, ChangeType, DeltaSnapshot, PoolMetricSnapshot, ThresholdRule,
};
use serde::Serialize;

const ALERT_ID_PREFIX: &str = "alert";

/// Payload attached to every alert as `metadata`
#[derive(Serialize)]
struct AlertContext<'a> {
    rule: &'a ThresholdRule,
    previous: &'a PoolMetricSnapshot,
    current: &'a PoolMetricSnapshot,
}

/// Match every delta against every rule.
///
/// Returns nothing when `previous` is `None`: a pool's first observation never alerts.
/// `triggered_at` stamps the alerts and stands in for the block number in the
/// alert id when the snapshot has none.
pub fn evaluate(
    deltas: &[DeltaSnapshot],
    current: &PoolMetricSnapshot,
    previous: Option<&PoolMetricSnapshot>,
    rules: &[ThresholdRule],
    triggered_at: i64,
) -> Vec<AlertEvent> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    if deltas.is_empty() || rules.is_empty() {
        return Vec::new();
    }

    let mut alerts = Vec::new();
    for delta in deltas {
        for rule in rules {
            if !rule.applies_to_pool(&current.protocol_id, &current.pool_id) {
                continue;
            }
            if rule.metric != delta.metric {
                continue;
            }
            let direction = ChangeDirection::from_change(delta.absolute_change);
            if !rule.change.direction.accepts(direction) {
                continue;
            }
            if !meets_threshold(rule, delta) {
                continue;
            }

            let metadata = serde_json::to_value(AlertContext {
                rule,
                previous,
                current,
            })
            .ok();

            alerts.push(AlertEvent {
                id: alert_id(&rule.id, current, triggered_at),
                protocol_id: current.protocol_id.clone(),
                pool_id: current.pool_id.clone(),
                metric: delta.metric,
                rule_id: rule.id.clone(),
                triggered_at,
                block_number: current.block_number,
                change_direction: direction,
                change_amount: delta.absolute_change,
                percent_change: delta.percent_change,
                message: alert_message(rule, current, delta),
                metadata,
            });
        }
    }

    if !alerts.is_empty() {
        tracing::debug!(
            protocol_id = %current.protocol_id,
            pool_id = %current.pool_id,
            count = alerts.len(),
            "Threshold rules triggered"
        );
    }
    alerts
}

fn meets_threshold(rule: &ThresholdRule, delta: &DeltaSnapshot) -> bool {
    match rule.change.change_type {
        ChangeType::Percent => delta
            .percent_change
            .map(|pct| pct.abs() >= rule.change.amount)
            .unwrap_or(false),
        ChangeType::Absolute => delta.absolute_change.abs() >= rule.change.amount,
    }
}

/// Deterministic alert id: `alert::{rule}::{protocol}::{pool}::{block or fallback clock}`.
pub fn alert_id(rule_id: &str, snapshot: &PoolMetricSnapshot, fallback_clock: i64) -> String {
    let marker = match snapshot.block_number {
        Some(block) => block.to_string(),
        None => fallback_clock.to_string(),
    };
    [
        ALERT_ID_PREFIX,
        rule_id,
        snapshot.protocol_id.as_str(),
        snapshot.pool_id.as_str(),
        marker.as_str(),
    ]
    .join("::")
}

fn alert_message(rule: &ThresholdRule, snapshot: &PoolMetricSnapshot, delta: &DeltaSnapshot) -> String {
    format!(
        "Rule {} triggered on {}/{} for {} ({})",
        rule.id,
        snapshot.protocol_id,
        snapshot.pool_id,
        rule.metric.as_str(),
        format_change(rule.change.change_type, delta)
    )
}

/// Human-readable change: `50.00%` for percent rules, `1,234.5` for absolute ones.
pub fn format_change(change_type: ChangeType, delta: &DeltaSnapshot) -> String {
    match change_type {
        ChangeType::Percent => match delta.percent_change {
            Some(pct) => format!("{:.2}%", pct),
            None => "n/a".to_string(),
        },
        ChangeType::Absolute => group_thousands(delta.absolute_change),
    }
}

/// Comma-grouped integer part, at most three fraction digits, trailing zeros dropped.
fn group_thousands(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let rounded = format!("{:.3}", value.abs());
    let (int_part, frac_part) = rounded.split_once('.').unwrap_or((rounded.as_str(), ""));
    let frac_part = frac_part.trim_end_matches('0');

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let negative = value < 0.0 && rounded.chars().any(|c| c != '0' && c != '.');
    let sign = if negative { "-" } else { "" };
    if frac_part.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute_deltas;
    use pool_core::{
        MetricKind, RuleDirection, RuleScope, RuleWindow, ThresholdChange,
    };

    fn snapshot(pool_id: &str, tvl: f64, block: Option<u64>) -> PoolMetricSnapshot {
        PoolMetricSnapshot {
            protocol_id: "aave-v3".to_string(),
            pool_id: pool_id.to_string(),
            chain_id: 1,
            address: "0x0000000000000000000000000000000000000001".to_string(),
            block_number: block,
            timestamp: 1_700_000_000_000,
            apy: None,
            tvl: Some(tvl),
            raw: None,
        }
    }

    fn rule(change_type: ChangeType, direction: RuleDirection, amount: f64) -> ThresholdRule {
        ThresholdRule {
            id: "tvl-move".to_string(),
            metric: MetricKind::Tvl,
            change: ThresholdChange {
                change_type,
                direction,
                amount,
            },
            window: RuleWindow::default(),
            applies_to: None,
            metadata: None,
        }
    }

    fn run(rules: &[ThresholdRule], before: f64, after: f64) -> Vec<AlertEvent> {
        let previous = snapshot("usdc", before, Some(10));
        let current = snapshot("usdc", after, Some(11));
        let deltas = compute_deltas(Some(&previous), &current);
        evaluate(&deltas, &current, Some(&previous), rules, 42)
    }

    #[test]
    fn fifty_percent_jump_alerts_once() {
        let rules = [rule(ChangeType::Percent, RuleDirection::Increase, 10.0)];
        let alerts = run(&rules, 1000.0, 1500.0);

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.change_direction, ChangeDirection::Increase);
        assert!((alert.percent_change.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(alert.change_amount, 500.0);
        assert_eq!(alert.id, "alert::tvl-move::aave-v3::usdc::11");
        assert_eq!(alert.triggered_at, 42);
        assert_eq!(
            alert.message,
            "Rule tvl-move triggered on aave-v3/usdc for tvl (50.00%)"
        );
        let metadata = alert.metadata.as_ref().unwrap();
        assert_eq!(metadata["rule"]["id"], "tvl-move");
        assert_eq!(metadata["previous"]["tvl"], 1000.0);
        assert_eq!(metadata["current"]["blockNumber"], "11");
    }

    #[test]
    fn below_threshold_is_silent() {
        let rules = [rule(ChangeType::Percent, RuleDirection::Increase, 10.0)];
        assert!(run(&rules, 1000.0, 1050.0).is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let rules = [rule(ChangeType::Absolute, RuleDirection::Both, 50.0)];
        assert_eq!(run(&rules, 1000.0, 1050.0).len(), 1);
        assert_eq!(run(&rules, 1000.0, 950.0).len(), 1);
    }

    #[test]
    fn direction_filter() {
        let rules = [rule(ChangeType::Percent, RuleDirection::Decrease, 5.0)];
        assert!(run(&rules, 1000.0, 1500.0).is_empty());

        let alerts = run(&rules, 1000.0, 500.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].change_direction, ChangeDirection::Decrease);
    }

    #[test]
    fn unchanged_reading_never_alerts() {
        let rules = [
            rule(ChangeType::Percent, RuleDirection::Both, 0.0001),
            rule(ChangeType::Absolute, RuleDirection::Increase, 0.0001),
        ];
        assert!(run(&rules, 1000.0, 1000.0).is_empty());
    }

    #[test]
    fn zero_baseline_skips_percent_rules_only() {
        let rules = [
            rule(ChangeType::Percent, RuleDirection::Both, 1.0),
            ThresholdRule {
                id: "abs".to_string(),
                ..rule(ChangeType::Absolute, RuleDirection::Both, 100.0)
            },
        ];
        let alerts = run(&rules, 0.0, 2500.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id, "abs");
        assert_eq!(
            alerts[0].message,
            "Rule abs triggered on aave-v3/usdc for tvl (2,500)"
        );
    }

    #[test]
    fn scoping_is_case_insensitive() {
        let scoped = ThresholdRule {
            applies_to: Some(RuleScope {
                protocol_ids: Some(vec!["AAVE-V3".to_string()]),
                pool_ids: Some(vec!["WETH".to_string()]),
            }),
            ..rule(ChangeType::Percent, RuleDirection::Both, 10.0)
        };
        assert!(run(&[scoped.clone()], 1000.0, 2000.0).is_empty());

        let previous = snapshot("weth", 1000.0, Some(10));
        let current = snapshot("weth", 2000.0, Some(11));
        let deltas = compute_deltas(Some(&previous), &current);
        let alerts = evaluate(&deltas, &current, Some(&previous), &[scoped], 0);
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn metric_mismatch_is_ignored() {
        let apy_rule = ThresholdRule {
            metric: MetricKind::Apy,
            ..rule(ChangeType::Percent, RuleDirection::Both, 1.0)
        };
        assert!(run(&[apy_rule], 1000.0, 2000.0).is_empty());
    }

    #[test]
    fn no_previous_no_alerts() {
        let current = snapshot("usdc", 1000.0, Some(11));
        let previous = snapshot("usdc", 10.0, Some(10));
        let deltas = compute_deltas(Some(&previous), &current);
        let rules = [rule(ChangeType::Absolute, RuleDirection::Both, 1.0)];
        assert!(evaluate(&deltas, &current, None, &rules, 0).is_empty());
    }

    #[test]
    fn alert_id_falls_back_to_clock() {
        let current = snapshot("usdc", 1.0, None);
        assert_eq!(
            alert_id("r1", &current, 1_700_000_000_123),
            "alert::r1::aave-v3::usdc::1700000000123"
        );
    }

    #[test]
    fn groups_thousands() {
        assert_eq!(group_thousands(0.0), "0");
        assert_eq!(group_thousands(999.0), "999");
        assert_eq!(group_thousands(1234567.0), "1,234,567");
        assert_eq!(group_thousands(-1234.5678), "-1,234.568");
        assert_eq!(group_thousands(12.5), "12.5");
        assert_eq!(group_thousands(-0.0001), "0");
    }
}
