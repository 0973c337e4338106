//! Pool Watcher
//!
//! Ties adapters, the delta/alert engine, and the stores together: a
//! [`Scheduler`] that polls configured watchers on their interval, and a
//! [`MonitoringService`] exposing configuration, reads, health, and summaries.

pub mod error;
pub mod health;
pub mod scheduler;
pub mod service;


pub use error::WatcherError;
pub use health::{HealthState, HealthStatus};
pub use scheduler::{CycleStats, PollOutcome, Scheduler, SchedulerOptions, DEFAULT_POLLING_INTERVAL_MS};
pub use service::{MonitoringService, SummaryReport};
