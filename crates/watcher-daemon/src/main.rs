use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pool_core::{ProtocolAdapter, WatcherConfigInput};
use pool_watcher::{MonitoringService, Scheduler};
use protocol_adapters::{AaveV3Adapter, AdapterRegistry, CurveAdapter};
use tokio::signal::unix::SignalKind;
use tokio::time;
use watcher_store::{MemoryStore, MetricsStore, SqlStore, WatcherConfigStore};

mod config;

use config::{StoreBackend, WatcherSettings};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting yield pool watcher");

    // 2. Configuration
    let settings = WatcherSettings::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Store backend: {:?}", settings.store_backend);
    tracing::info!("  Default polling interval: {} ms", settings.default_polling_interval_ms);
    tracing::info!("  Adapter timeout: {} ms", settings.adapter_timeout_ms);
    tracing::info!("  History capacity: {}", settings.history_capacity);

    // 3. Storage
    let (metrics, configs) = open_store(&settings).await?;

    // 4. Adapters
    let registry = Arc::new(AdapterRegistry::with_adapters([
        Arc::new(AaveV3Adapter::new()) as Arc<dyn ProtocolAdapter>,
        Arc::new(CurveAdapter::new()),
    ]));
    for adapter in registry.list_all() {
        tracing::info!(
            "  Adapter {} (protocols: {}, chains: {:?})",
            adapter.id(),
            adapter.supports().protocol_ids.join(", "),
            adapter.supports().chains
        );
    }

    let scheduler = Scheduler::new(registry, metrics, configs, settings.scheduler_options());
    let service = MonitoringService::new(scheduler.clone());

    // 5. Startup watcher config
    if let Some(path) = &settings.watcher_config_file {
        apply_config_file(&service, &settings.watcher_id, path).await?;
    }

    let health = service.health().await?;
    tracing::info!(
        "Startup check: {} active pool(s) across {} protocol(s)",
        health.active_pools,
        health.configured_protocols
    );

    // 6. Run until SIGINT / SIGTERM
    scheduler.start().await?;

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                match service.health().await {
                    Ok(health) => tracing::info!(
                        status = ?health.status,
                        active_pools = health.active_pools,
                        last_run_at = ?health.last_run_at,
                        "Heartbeat"
                    ),
                    Err(e) => tracing::error!("Health check failed: {}", e),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, waiting for in-flight cycles...");
                scheduler.stop().await;
                break;
            }
        }
    }

    tracing::info!("Pool watcher shut down.");
    Ok(())
}

async fn open_store(
    settings: &WatcherSettings,
) -> Result<(Arc<dyn MetricsStore>, Arc<dyn WatcherConfigStore>)> {
    match settings.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, state is lost on restart");
            let store = Arc::new(MemoryStore::new(settings.store_options()));
            let metrics: Arc<dyn MetricsStore> = store.clone();
            let configs: Arc<dyn WatcherConfigStore> = store;
            Ok((metrics, configs))
        }
        StoreBackend::Sql => {
            let store = SqlStore::connect(&settings.database_url, settings.store_options())
                .await
                .context("Failed to open watcher database")?;

            store
                .ping()
                .await
                .context("Startup check: database unreachable")?;
            tracing::info!("Startup check: database OK ({:?})", store.dialect());

            let store = Arc::new(store);
            let metrics: Arc<dyn MetricsStore> = store.clone();
            let configs: Arc<dyn WatcherConfigStore> = store;
            Ok((metrics, configs))
        }
    }
}

/// Apply the startup config unless the stored one is already identical,
/// so restarts keep their history.
async fn apply_config_file(
    service: &MonitoringService,
    watcher_id: &str,
    path: &std::path::Path,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let input: WatcherConfigInput = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid watcher config JSON in {}", path.display()))?;

    let candidate = input.validate()?;
    if let Some(current) = service.config(watcher_id).await? {
        if current.config == candidate {
            tracing::info!(
                watcher_id = %watcher_id,
                version = current.version,
                "Stored config matches {}, keeping history",
                path.display()
            );
            return Ok(());
        }
    }

    let versioned = service.configure(watcher_id, &input).await?;
    tracing::info!(
        watcher_id = %watcher_id,
        version = versioned.version,
        "Applied watcher config from {}",
        path.display()
    );
    Ok(())
}
