//! Error types for the agent

use fleetcost_core::CostError;
use thiserror::Error;

/// Agent result type
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur in the agent
///
/// Every variant is fatal to the accounting loop.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Accounting core error
    #[error(transparent)]
    Cost(#[from] CostError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Collaborator answered with a non-success status
    #[error("{url} returned {status}")]
    Status {
        /// Requested URL
        url: String,
        /// Response status
        status: reqwest::StatusCode,
    },

    /// S3 error
    #[error("S3 error: {0}")]
    S3(#[from] aws_sdk_s3::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event subscription error
    #[error("Subscription error: {0}")]
    Subscription(String),
}

impl AgentError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a subscription error
    pub fn subscription(msg: impl Into<String>) -> Self {
        Self::Subscription(msg.into())
    }

    /// Convert from an S3 operation error
    pub fn from_s3<E>(err: E) -> Self
    where
        aws_sdk_s3::Error: From<E>,
    {
        Self::S3(aws_sdk_s3::Error::from(err))
    }
}
