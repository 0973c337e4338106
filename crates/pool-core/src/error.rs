use std::fmt;

use thiserror::Error;

/// A single problem found while validating a watcher config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path to the offending field, e.g. `pools[1].address`
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Rejected watcher config. Carries every issue found, not just the first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid watcher config: {}", join_issues(.issues))]
pub struct ConfigValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure reading from a chain client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Contract call reverted: {0}")]
    Reverted(String),

    #[error("Block not found: {0}")]
    BlockNotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("Chain {chain_id} is not supported by adapter {adapter}")]
    UnsupportedChain { adapter: String, chain_id: u64 },

    #[error("Invalid pool metadata for {pool_id}: {reason}")]
    InvalidMetadata { pool_id: String, reason: String },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Adapter timed out after {0} ms")]
    Timeout(u64),

    #[error("Adapter error: {0}")]
    Other(String),
}
