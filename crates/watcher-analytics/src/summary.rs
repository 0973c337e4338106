//! Watcher activity summary.
//!
//! Built from a watcher's config, latest snapshots, delta history and alert
//! history. [`render_text`] gives a deterministic plain-text digest of it.

use chrono::{DateTime, Duration, Utc};
use pool_core::{
    AlertEvent, ChangeType, DeltaSnapshot, MetricKind, PoolConfig, PoolMetricSnapshot,
    WatcherConfig,
};
use serde::Serialize;

pub const DEFAULT_TIMEFRAME_HOURS: u32 = 24;
pub const DEFAULT_MAX_RECENT_ALERTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryOptions {
    /// Clamped to 1..=168
    pub timeframe_hours: u32,
    /// Per pool, clamped to 1..=20
    pub max_recent_alerts: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            timeframe_hours: DEFAULT_TIMEFRAME_HOURS,
            max_recent_alerts: DEFAULT_MAX_RECENT_ALERTS,
        }
    }
}

impl SummaryOptions {
    fn normalized(self) -> Self {
        Self {
            timeframe_hours: self.timeframe_hours.clamp(1, 168),
            max_recent_alerts: self.max_recent_alerts.clamp(1, 20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricChangeStats {
    pub data_points: usize,
    pub largest_increase_percent: Option<f64>,
    pub largest_decrease_percent: Option<f64>,
    /// Sum of absolute changes, regardless of sign
    pub cumulative_absolute_change: f64,
    pub last_change_percent: Option<f64>,
    pub last_change_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub protocol_id: String,
    pub pool_id: String,
    pub chain_id: u64,
    pub address: String,
    pub current: Option<PoolMetricSnapshot>,
    pub tvl_stats: Option<MetricChangeStats>,
    pub apy_stats: Option<MetricChangeStats>,
    /// Oldest first
    pub recent_alerts: Vec<AlertEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAlertCount {
    pub rule_id: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTotals {
    pub total_alerts: usize,
    pub by_rule: Vec<RuleAlertCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherSummary {
    pub generated_at: DateTime<Utc>,
    pub timeframe_hours: u32,
    pub config: Option<WatcherConfig>,
    pub pools: Vec<PoolSummary>,
    pub alert_totals: AlertTotals,
}

fn same_pool(pool: &PoolConfig, protocol_id: &str, pool_id: &str) -> bool {
    pool.protocol_id.eq_ignore_ascii_case(protocol_id) && pool.id.eq_ignore_ascii_case(pool_id)
}

/// Summary for a watcher with no config yet.
pub fn unconfigured_summary(now: DateTime<Utc>, options: SummaryOptions) -> WatcherSummary {
    WatcherSummary {
        generated_at: now,
        timeframe_hours: options.normalized().timeframe_hours,
        config: None,
        pools: Vec::new(),
        alert_totals: AlertTotals {
            total_alerts: 0,
            by_rule: Vec::new(),
        },
    }
}

pub fn build_summary(
    config: &WatcherConfig,
    latest: &[PoolMetricSnapshot],
    deltas: &[DeltaSnapshot],
    alerts: &[AlertEvent],
    now: DateTime<Utc>,
    options: SummaryOptions,
) -> WatcherSummary {
    let options = options.normalized();
    let since = (now - Duration::hours(i64::from(options.timeframe_hours))).timestamp_millis();

    let window_alerts: Vec<&AlertEvent> = alerts.iter().filter(|a| a.triggered_at >= since).collect();

    let pools = config
        .pools
        .iter()
        .map(|pool| {
            let pool_deltas: Vec<&DeltaSnapshot> = deltas
                .iter()
                .filter(|d| d.timestamp >= since && same_pool(pool, &d.protocol_id, &d.pool_id))
                .collect();

            let mut recent: Vec<AlertEvent> = window_alerts
                .iter()
                .filter(|a| same_pool(pool, &a.protocol_id, &a.pool_id))
                .map(|a| (*a).clone())
                .collect();
            recent.sort_by_key(|a| a.triggered_at);
            if recent.len() > options.max_recent_alerts {
                recent.drain(..recent.len() - options.max_recent_alerts);
            }

            PoolSummary {
                protocol_id: pool.protocol_id.clone(),
                pool_id: pool.id.clone(),
                chain_id: pool.chain_id,
                address: pool.address.clone(),
                current: latest
                    .iter()
                    .find(|s| same_pool(pool, &s.protocol_id, &s.pool_id))
                    .cloned(),
                tvl_stats: metric_stats(&pool_deltas, MetricKind::Tvl),
                apy_stats: metric_stats(&pool_deltas, MetricKind::Apy),
                recent_alerts: recent,
            }
        })
        .collect();

    WatcherSummary {
        generated_at: now,
        timeframe_hours: options.timeframe_hours,
        config: Some(config.clone()),
        pools,
        alert_totals: AlertTotals {
            total_alerts: window_alerts.len(),
            by_rule: count_by_rule(&window_alerts),
        },
    }
}

fn metric_stats(deltas: &[&DeltaSnapshot], metric: MetricKind) -> Option<MetricChangeStats> {
    let series: Vec<&DeltaSnapshot> = deltas.iter().copied().filter(|d| d.metric == metric).collect();
    let last = series.last()?;

    let percents: Vec<f64> = series.iter().filter_map(|d| d.percent_change).collect();
    Some(MetricChangeStats {
        data_points: series.len(),
        largest_increase_percent: percents.iter().copied().reduce(f64::max),
        largest_decrease_percent: percents.iter().copied().reduce(f64::min),
        cumulative_absolute_change: series.iter().map(|d| d.absolute_change.abs()).sum(),
        last_change_percent: last.percent_change,
        last_change_amount: last.absolute_change,
    })
}

/// Alert counts per rule, in order of first appearance.
fn count_by_rule(alerts: &[&AlertEvent]) -> Vec<RuleAlertCount> {
    let mut counts: Vec<RuleAlertCount> = Vec::new();
    for alert in alerts {
        match counts.iter_mut().find(|c| c.rule_id == alert.rule_id) {
            Some(entry) => entry.count += 1,
            None => counts.push(RuleAlertCount {
                rule_id: alert.rule_id.clone(),
                count: 1,
            }),
        }
    }
    counts
}

fn plural(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

/// Plain-text digest, one line per pool after a short header.
pub fn render_text(summary: &WatcherSummary) -> String {
    let Some(config) = &summary.config else {
        return "Watcher is not configured.".to_string();
    };

    let mut lines = Vec::with_capacity(3 + summary.pools.len());
    lines.push(format!(
        "Watcher is monitoring {} across {}.",
        plural(config.pools.len(), "pool", "pools"),
        plural(config.protocol_ids.len(), "protocol", "protocols"),
    ));

    let examples: Vec<String> = config
        .threshold_rules
        .iter()
        .take(2)
        .map(|rule| {
            let unit = if rule.change.change_type == ChangeType::Percent { "%" } else { "" };
            format!(
                "{} {} {}{}",
                rule.metric.as_str(),
                rule.change.direction.as_str(),
                rule.change.amount,
                unit
            )
        })
        .collect();
    let rule_count = config.threshold_rules.len();
    lines.push(format!(
        "There {} {} configured (e.g. {}).",
        if rule_count == 1 { "is" } else { "are" },
        plural(rule_count, "threshold rule", "threshold rules"),
        if examples.is_empty() { "n/a".to_string() } else { examples.join("; ") }
    ));
    lines.push(format!(
        "Last {}h: {} fired.",
        summary.timeframe_hours,
        plural(summary.alert_totals.total_alerts, "alert", "alerts")
    ));

    for pool in &summary.pools {
        let apy = pool
            .current
            .as_ref()
            .and_then(|s| s.apy)
            .map(|apy| format!("{:.2}%", apy))
            .unwrap_or_else(|| "n/a".to_string());
        let tvl = pool
            .current
            .as_ref()
            .and_then(|s| s.tvl)
            .map(|tvl| format!("${:.2}M", tvl / 1_000_000.0))
            .unwrap_or_else(|| "n/a".to_string());

        let mut highlights = Vec::new();
        if let Some(pct) = pool.apy_stats.as_ref().and_then(|s| s.largest_increase_percent) {
            highlights.push(format!("max APY change {:.3}%", pct));
        }
        if let Some(pct) = pool.tvl_stats.as_ref().and_then(|s| s.largest_increase_percent) {
            highlights.push(format!("max TVL change {:.3}%", pct));
        }
        highlights.push(match pool.recent_alerts.last() {
            Some(alert) => format!(
                "Latest alert: {} {} {}",
                alert.metric.as_str(),
                alert.change_direction.as_str(),
                alert
                    .percent_change
                    .map(|p| format!("{:.3}%", p))
                    .unwrap_or_else(|| "n/a".to_string())
            ),
            None => "No alerts".to_string(),
        });

        lines.push(format!(
            "- {}/{} (chain {}): APY {}, TVL {}. {}",
            pool.protocol_id,
            pool.pool_id,
            pool.chain_id,
            apy,
            tvl,
            highlights.join(" | ")
        ));
    }

    lines.join("\n")
}
