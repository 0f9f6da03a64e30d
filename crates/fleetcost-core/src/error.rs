//! Error types for cost accounting

use thiserror::Error;

/// Cost accounting result type
pub type Result<T> = std::result::Result<T, CostError>;

/// Errors that can occur while accounting cluster cost
///
/// Only [`CostError::UnknownInstanceType`] is recoverable inside a pass;
/// every other variant means the pass (and, in the agent, the process) stops.
#[derive(Error, Debug)]
pub enum CostError {
    /// Price table has no entry for this instance type
    #[error("Unknown instance type: {0}")]
    UnknownInstanceType(String),

    /// Host inventory could not be aggregated
    #[error("Malformed host snapshot: {0}")]
    MalformedSnapshot(String),

    /// No checkpoint stored at the backing location
    #[error("Checkpoint missing at {0}")]
    CheckpointMissing(String),

    /// Stored checkpoint is not an RFC 3339 timestamp
    #[error("Checkpoint at {location} is not an RFC 3339 timestamp: {value:?}")]
    CheckpointParse {
        /// Where the value was read from
        location: String,
        /// Raw stored value
        value: String,
    },

    /// Checkpoint could not be persisted
    #[error("Checkpoint write to {location} failed: {reason}")]
    CheckpointWrite {
        /// Where the value was written
        location: String,
        /// Underlying failure
        reason: String,
    },

    /// Price table could not be loaded
    #[error("Price source error: {0}")]
    PriceSource(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CostError {
    /// Create a malformed snapshot error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedSnapshot(msg.into())
    }

    /// Create a price source error
    pub fn price_source(msg: impl Into<String>) -> Self {
        Self::PriceSource(msg.into())
    }

    /// Create a checkpoint write error
    pub fn checkpoint_write(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::CheckpointWrite {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}
