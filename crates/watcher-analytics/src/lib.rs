//! Watcher Analytics
//!
//! Read-side reports over stored watcher data: a per-watcher activity summary
//! with a plain-text rendering, and top-yield ranking of tracked pools.

pub mod summary;
pub mod top_yields;

pub use summary::{
    build_summary, render_text, unconfigured_summary, AlertTotals, MetricChangeStats,
    PoolSummary, RuleAlertCount, SummaryOptions, WatcherSummary,
};
pub use top_yields::{top_yields, YieldSort, TopYieldsQuery};
