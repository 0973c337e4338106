use std::sync::Arc;

use chrono::Utc;
use pool_core::{
    AlertEvent, AlertsFilter, DeltaSnapshot, MetricsFilter, PoolMetricSnapshot, VersionedConfig,
    WatcherConfigInput, WatcherStatus,
};
use serde::Serialize;
use watcher_analytics::{
    build_summary, render_text, top_yields, unconfigured_summary, SummaryOptions, TopYieldsQuery,
    WatcherSummary,
};
use watcher_store::{MetricsStore, WatcherConfigStore};

use crate::health::{self, HealthStatus};
use crate::{Scheduler, WatcherError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    pub summary: WatcherSummary,
    pub text: String,
}

/// Caller-facing operations over a scheduler and its stores.
#[derive(Clone)]
pub struct MonitoringService {
    scheduler: Scheduler,
    metrics: Arc<dyn MetricsStore>,
    configs: Arc<dyn WatcherConfigStore>,
}

impl MonitoringService {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            metrics: Arc::clone(scheduler.metrics_store()),
            configs: Arc::clone(scheduler.config_store()),
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Validate and store a new config version, clearing the watcher's
    /// history in the same store write so old baselines never mix with new
    /// pools or rules.
    ///
    /// A rejected config or a failed write leaves the stored config and all
    /// history untouched.
    pub async fn configure(
        &self,
        watcher_id: &str,
        input: &WatcherConfigInput,
    ) -> Result<VersionedConfig, WatcherError> {
        let config = input.validate()?;

        let version = self.configs.save_and_reset(watcher_id, &config).await?;

        tracing::info!(
            watcher_id = %watcher_id,
            version,
            pools = config.pools.len(),
            rules = config.threshold_rules.len(),
            "Watcher configured"
        );
        Ok(VersionedConfig { config, version })
    }

    pub async fn config(&self, watcher_id: &str) -> Result<Option<VersionedConfig>, WatcherError> {
        Ok(self.configs.latest(watcher_id).await?)
    }

    pub async fn set_status(&self, watcher_id: &str, status: WatcherStatus) -> Result<(), WatcherError> {
        self.configs.set_status(watcher_id, status).await?;
        tracing::info!(watcher_id = %watcher_id, status = status.as_str(), "Watcher status changed");
        Ok(())
    }

    pub async fn metrics(
        &self,
        watcher_id: &str,
        filter: &MetricsFilter,
    ) -> Result<Vec<PoolMetricSnapshot>, WatcherError> {
        Ok(self.metrics.latest_snapshots(watcher_id, filter).await?)
    }

    pub async fn deltas(
        &self,
        watcher_id: &str,
        filter: &MetricsFilter,
    ) -> Result<Vec<DeltaSnapshot>, WatcherError> {
        Ok(self.metrics.deltas(watcher_id, filter, None).await?)
    }

    pub async fn alerts(&self, watcher_id: &str, filter: &AlertsFilter) -> Result<Vec<AlertEvent>, WatcherError> {
        Ok(self.metrics.alerts(watcher_id, filter).await?)
    }

    pub async fn health(&self) -> Result<HealthStatus, WatcherError> {
        let watchers = self.configs.list_watchers().await?;
        Ok(health::aggregate(
            self.scheduler.is_running(),
            &watchers,
            self.default_interval_ms(),
        ))
    }

    pub async fn health_for(&self, watcher_id: &str) -> Result<HealthStatus, WatcherError> {
        let watchers = self.configs.list_watchers().await?;
        let entry = watchers.iter().find(|w| w.watcher_id == watcher_id);
        Ok(health::for_watcher(
            self.scheduler.is_running(),
            entry,
            self.default_interval_ms(),
        ))
    }

    pub async fn summarize(
        &self,
        watcher_id: &str,
        options: SummaryOptions,
    ) -> Result<SummaryReport, WatcherError> {
        let now = Utc::now();

        let summary = match self.configs.latest(watcher_id).await? {
            None => unconfigured_summary(now, options),
            Some(versioned) => {
                let all = MetricsFilter::default();
                let latest = self.metrics.latest_snapshots(watcher_id, &all).await?;
                let deltas = self.metrics.deltas(watcher_id, &all, None).await?;
                let alerts = self.metrics.alerts(watcher_id, &AlertsFilter::default()).await?;
                build_summary(&versioned.config, &latest, &deltas, &alerts, now, options)
            }
        };

        let text = render_text(&summary);
        Ok(SummaryReport { summary, text })
    }

    pub async fn top_yields(
        &self,
        watcher_id: &str,
        query: &TopYieldsQuery,
    ) -> Result<Vec<PoolMetricSnapshot>, WatcherError> {
        let latest = self
            .metrics
            .latest_snapshots(watcher_id, &MetricsFilter::default())
            .await?;
        Ok(top_yields(&latest, query))
    }

    fn default_interval_ms(&self) -> u64 {
        self.scheduler.options().default_polling_interval.as_millis() as u64
    }
}
