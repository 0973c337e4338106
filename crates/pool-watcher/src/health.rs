use std::collections::HashSet;

use pool_core::WatcherStatus;
use serde::Serialize;
use watcher_store::WatcherEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Unconfigured,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: HealthState,
    pub polling_interval_ms: u64,
    pub active_pools: usize,
    pub configured_protocols: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<i64>,
}

/// Aggregate health over every configured watcher.
///
/// Counts cover active watchers only. The reported interval is the tightest
/// configured one, falling back to the default.
pub fn aggregate(running: bool, watchers: &[WatcherEntry], default_interval_ms: u64) -> HealthStatus {
    let active: Vec<&WatcherEntry> = watchers
        .iter()
        .filter(|w| w.status == WatcherStatus::Active)
        .collect();

    let protocols: HashSet<String> = active
        .iter()
        .flat_map(|w| w.config.protocol_ids.iter().map(|p| p.to_lowercase()))
        .collect();

    HealthStatus {
        status: state(running, !watchers.is_empty()),
        polling_interval_ms: active
            .iter()
            .filter_map(|w| w.config.polling_interval_ms)
            .min()
            .unwrap_or(default_interval_ms),
        active_pools: active.iter().map(|w| w.config.pools.len()).sum(),
        configured_protocols: protocols.len(),
        last_run_at: watchers.iter().filter_map(|w| w.last_run_at).max(),
    }
}

/// Health of a single watcher. Without an entry it reports `unconfigured`
/// (`stopped` when the scheduler is down) with zero counts and the default
/// interval.
pub fn for_watcher(running: bool, entry: Option<&WatcherEntry>, default_interval_ms: u64) -> HealthStatus {
    match entry {
        Some(entry) => HealthStatus {
            status: state(running, true),
            polling_interval_ms: entry.config.polling_interval_ms.unwrap_or(default_interval_ms),
            active_pools: entry.config.pools.len(),
            configured_protocols: entry.config.protocol_ids.len(),
            last_run_at: entry.last_run_at,
        },
        None => HealthStatus {
            status: state(running, false),
            polling_interval_ms: default_interval_ms,
            active_pools: 0,
            configured_protocols: 0,
            last_run_at: None,
        },
    }
}

fn state(running: bool, configured: bool) -> HealthState {
    match (running, configured) {
        (false, _) => HealthState::Stopped,
        (true, false) => HealthState::Unconfigured,
        (true, true) => HealthState::Ok,
    }
}
