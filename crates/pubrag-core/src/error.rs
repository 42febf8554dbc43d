//! Error types shared across the workspace.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PubragError>;

#[derive(Debug, Error)]
pub enum PubragError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("API key missing for provider: {0}")]
    ApiKeyMissing(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PubragError {
    /// Timeouts, network faults and throttling. These are retried once
    /// before a component falls back to its degraded behavior.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PubragError::Http(_) | PubragError::Timeout { .. } | PubragError::RateLimited(_)
        )
    }

    pub fn timeout(operation: &str, after: std::time::Duration) -> Self {
        PubragError::Timeout {
            operation: operation.to_string(),
            after_ms: after.as_millis() as u64,
        }
    }
}
