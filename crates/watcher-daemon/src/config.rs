use anyhow::{ensure, Context, Result};
use pool_watcher::SchedulerOptions;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use watcher_store::StoreOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sql,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sql" => Ok(StoreBackend::Sql),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("unknown STORE_BACKEND '{}', expected sql or memory", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    // Storage
    pub database_url: String,
    pub store_backend: StoreBackend,
    pub history_capacity: usize,

    // Scheduling
    pub default_polling_interval_ms: u64,
    pub scheduler_tick_ms: u64,
    pub adapter_timeout_ms: u64,
    pub lease_ttl_ms: u64,

    // Startup watcher
    pub watcher_id: String,
    pub watcher_config_file: Option<PathBuf>,
}

impl WatcherSettings {
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://pool-watcher.db?mode=rwc".to_string()),
            store_backend: env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "sql".to_string())
                .parse()?,
            history_capacity: env::var("HISTORY_CAPACITY")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .context("HISTORY_CAPACITY must be a positive integer")?,

            default_polling_interval_ms: env::var("DEFAULT_POLLING_INTERVAL_MS")
                .unwrap_or_else(|_| "12000".to_string())
                .parse()
                .context("DEFAULT_POLLING_INTERVAL_MS must be a positive integer")?,
            scheduler_tick_ms: env::var("SCHEDULER_TICK_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("SCHEDULER_TICK_MS must be a positive integer")?,
            adapter_timeout_ms: env::var("ADAPTER_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .context("ADAPTER_TIMEOUT_MS must be a positive integer")?,
            lease_ttl_ms: env::var("LEASE_TTL_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .context("LEASE_TTL_MS must be a positive integer")?,

            watcher_id: env::var("WATCHER_ID").unwrap_or_else(|_| "default".to_string()),
            watcher_config_file: env::var("WATCHER_CONFIG_FILE").ok().map(PathBuf::from),
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.history_capacity > 0, "HISTORY_CAPACITY must be greater than 0");
        ensure!(
            self.default_polling_interval_ms > 0,
            "DEFAULT_POLLING_INTERVAL_MS must be greater than 0"
        );
        ensure!(self.scheduler_tick_ms > 0, "SCHEDULER_TICK_MS must be greater than 0");
        ensure!(self.adapter_timeout_ms > 0, "ADAPTER_TIMEOUT_MS must be greater than 0");
        ensure!(self.lease_ttl_ms > 0, "LEASE_TTL_MS must be greater than 0");
        ensure!(!self.watcher_id.trim().is_empty(), "WATCHER_ID must not be empty");
        Ok(())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            history_capacity: self.history_capacity,
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            default_polling_interval: Duration::from_millis(self.default_polling_interval_ms),
            tick_interval: Duration::from_millis(self.scheduler_tick_ms),
            adapter_timeout: Duration::from_millis(self.adapter_timeout_ms),
            lease_ttl: Duration::from_millis(self.lease_ttl_ms),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}
