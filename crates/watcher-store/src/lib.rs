//! Watcher Store
//!
//! Persistence for watcher configs, latest pool snapshots, and bounded delta and
//! alert history. Two interchangeable backends: an in-process [`MemoryStore`]
//! and a durable multi-tenant [`SqlStore`] over `sqlx::AnyPool`.

pub mod error;
pub mod memory;
pub mod ring;
pub mod sql;
pub mod store;


pub use error::StoreError;
pub use memory::MemoryStore;
pub use ring::RingBuffer;
pub use sql::{Dialect, SqlStore};
pub use store::{CycleBatch, MetricsStore, StoreOptions, WatcherConfigStore, WatcherEntry};
