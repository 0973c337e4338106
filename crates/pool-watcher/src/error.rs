use pool_core::ConfigValidationError;
use thiserror::Error;
use watcher_store::StoreError;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("Watcher {0} is not configured")]
    NotConfigured(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,
}
