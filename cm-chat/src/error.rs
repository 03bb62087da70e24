use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Upstream failure taxonomy. The polling core converts each variant into a
/// scheduling decision; nothing here escapes a poll cycle.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Retryable on the normal schedule: network errors, timeouts, 5xx,
    /// payload parse failures.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Upstream asked us to slow down (429, quota exhaustion). Carries the
    /// upstream's suggested wait when it provided one.
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    /// The resource is gone or access is revoked; polling must stop.
    #[error("permanent upstream error: {0}")]
    Permanent(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        Self::Transient(format!("unexpected response format: {e}"))
    }
}
