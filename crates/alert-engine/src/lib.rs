//! Alert Engine
//!
//! Pure change detection over pool snapshots: per-metric deltas between two
//! consecutive readings, and threshold-rule evaluation producing alerts.

pub mod delta;
pub mod evaluator;

pub use delta::compute_deltas;
pub use evaluator::{alert_id, evaluate, format_change};
