//! Error types for the upstream sports-data client.

use std::time::Duration;

/// Failure of a single upstream call.
///
/// Cloneable so one outcome can be fanned out to every caller that was
/// coalesced onto the same in-flight request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// The upstream resource does not exist. Definitive; never retried.
    #[error("upstream resource not found: {path}")]
    NotFound { path: String },
    /// The upstream rejected the call with 429. `retry_after` carries the
    /// wait suggested by the upstream, when it gave one.
    #[error("upstream rate limit hit: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    /// Retrying a rate-limited call would exceed the configured ceiling.
    #[error("upstream rate limit persisted after {attempts} attempt(s)")]
    RateLimitExceeded {
        attempts: u32,
        retry_after: Option<Duration>,
    },
    #[error("upstream returned {status} for {path}: {message}")]
    Status {
        status: u16,
        path: String,
        message: String,
    },
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("failed to decode upstream response from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("fetch pipeline unavailable")]
    Unavailable,
}

impl UpstreamError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::RateLimitExceeded { .. }
        )
    }

    /// Failures that are part of normal operation against a rate-limited
    /// upstream and should not be logged above debug.
    pub fn is_expected(&self) -> bool {
        self.is_not_found() || self.is_rate_limited()
    }

    /// The wait suggested by the upstream, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::RateLimitExceeded { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }
}

impl From<reqwest_middleware::Error> for UpstreamError {
    fn from(e: reqwest_middleware::Error) -> Self {
        Self::Transport(format!("{e:#}"))
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(format!("{e:#}"))
    }
}
