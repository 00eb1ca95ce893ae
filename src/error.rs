//! Error taxonomy shared by the fetch, render, store and orchestration layers.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SentinelError {
    /// Malformed repository name, or subscribe/unsubscribe against the wrong state.
    #[error("validation error: {0}")]
    Validation(String),
    /// Repository unreachable or deleted upstream.
    #[error("repository not found: {0}")]
    NotFound(String),
    /// Network failure, timeout, rate limit or an unexpected upstream response.
    #[error("transient error: {0}")]
    Transient(String),
    /// Registry read/write failure.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl SentinelError {
    pub fn persistence(err: anyhow::Error) -> Self {
        SentinelError::Persistence(format!("{err:#}"))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SentinelError::Validation(_) => "validation",
            SentinelError::NotFound(_) => "not_found",
            SentinelError::Transient(_) => "transient",
            SentinelError::Persistence(_) => "persistence",
        }
    }
}

impl From<reqwest::Error> for SentinelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SentinelError::Transient(format!("request timed out: {err}"))
        } else {
            SentinelError::Transient(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for SentinelError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SentinelError::Transient("operation timed out".into())
    }
}
