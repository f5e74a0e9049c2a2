//! Error types and result handling for the Lazarus agent

use thiserror::Error;

/// Result type alias for Lazarus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Lazarus operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Outcome store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Enricher unavailable: {0}")]
    EnricherUnavailable(String),

    #[error("Executor failed: {0}")]
    ExecutorFailed(String),

    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Outcome already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_)
                | Error::EnricherUnavailable(_)
                | Error::ExecutorUnavailable(_)
                | Error::Timeout(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::StoreUnavailable(_) => "store",
            Error::EnricherUnavailable(_) => "enricher",
            Error::ExecutorFailed(_) => "executor",
            Error::ExecutorUnavailable(_) => "executor",
            Error::InvalidInput(_) => "input",
            Error::AlreadyResolved(_) => "conflict",
            Error::NotFound(_) => "not_found",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization",
            Error::Generic(_) => "generic",
        }
    }
}
