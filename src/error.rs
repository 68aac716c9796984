//! Error taxonomy and retry logic
//!
//! Every failure the distribution engine can observe is an [`OtaError`]. Errors
//! carry an [`ErrorCategory`] that decides whether they are retried, and the
//! HTTP layer maps them onto status codes through [`IntoResponse`].

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::time::sleep;

use crate::version::Version;

/// Result alias used across the crate
pub type OtaResult<T> = Result<T, OtaError>;

#[derive(Debug, thiserror::Error)]
pub enum OtaError {
    /// Missing or malformed API key
    #[error("invalid API key")]
    Unauthorized,

    /// A record with this version is already registered
    #[error("version {0} is already registered")]
    DuplicateVersion(Version),

    /// Neither the explicit target nor the rollback chain resolved
    #[error("rollback target for {0} not found")]
    RollbackNotFound(Version),

    #[error("invalid version `{input}`: {reason}")]
    InvalidVersion { input: String, reason: String },

    #[error("update payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// A push write failed or timed out; only ever handled by eviction
    #[error("write to client {client_id} failed: {reason}")]
    TransportWrite { client_id: String, reason: String },

    #[error("cannot watch {path}: {reason}")]
    WatchSetup { path: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Categorized error types for better handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected credentials (not retryable)
    Auth,

    /// Version race during synthesis (retryable)
    Conflict,

    /// Requested data does not exist (not retryable)
    NotFound,

    /// Bad input from a client or an authored record (not retryable)
    Validation,

    /// Connection-level failures (handled per subscription)
    Transport,

    /// File system errors
    FileSystem,

    /// Configuration errors (not retryable)
    Configuration,
}

impl ErrorCategory {
    /// Check if this error category is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Conflict)
    }
}

impl OtaError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OtaError::Unauthorized => ErrorCategory::Auth,
            OtaError::DuplicateVersion(_) => ErrorCategory::Conflict,
            OtaError::RollbackNotFound(_) => ErrorCategory::NotFound,
            OtaError::InvalidVersion { .. }
            | OtaError::PayloadTooLarge { .. }
            | OtaError::Json(_) => ErrorCategory::Validation,
            OtaError::TransportWrite { .. } => ErrorCategory::Transport,
            OtaError::WatchSetup { .. } | OtaError::Io(_) => ErrorCategory::FileSystem,
            OtaError::Config(_) => ErrorCategory::Configuration,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            OtaError::Unauthorized => StatusCode::UNAUTHORIZED,
            OtaError::DuplicateVersion(_) => StatusCode::CONFLICT,
            OtaError::RollbackNotFound(_) => StatusCode::NOT_FOUND,
            OtaError::InvalidVersion { .. } | OtaError::Json(_) => StatusCode::BAD_REQUEST,
            OtaError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            OtaError::TransportWrite { .. }
            | OtaError::WatchSetup { .. }
            | OtaError::Config(_)
            | OtaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OtaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,

    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl RetryPolicy {
    /// One immediate retry; used for version collisions where the retry
    /// recomputes its input instead of waiting.
    pub fn once() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::ZERO,
        }
    }
}

/// Execute with retry logic. Only retryable errors are retried; anything else
/// is returned on the first failure.
pub async fn with_retry<F, T>(policy: &RetryPolicy, mut operation: F) -> OtaResult<T>
where
    F: FnMut(u32) -> OtaResult<T>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt) {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "retrying"
                );
                if !policy.delay.is_zero() {
                    sleep(policy.delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let dup = OtaError::DuplicateVersion(Version::new(1, 0, 3));
        assert_eq!(dup.category(), ErrorCategory::Conflict);
        assert!(dup.is_retryable());

        assert_eq!(OtaError::Unauthorized.category(), ErrorCategory::Auth);
        assert!(!OtaError::Unauthorized.is_retryable());

        let missing = OtaError::RollbackNotFound(Version::new(1, 0, 0));
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retries_conflict_once_then_gives_up() {
        let mut calls = 0;
        let result: OtaResult<()> = with_retry(&RetryPolicy::once(), |_| {
            calls += 1;
            Err(OtaError::DuplicateVersion(Version::new(1, 0, 1)))
        })
        .await;

        assert!(matches!(result, Err(OtaError::DuplicateVersion(_))));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let mut calls = 0;
        let result: OtaResult<()> = with_retry(&RetryPolicy::once(), |_| {
            calls += 1;
            Err(OtaError::Unauthorized)
        })
        .await;

        assert!(matches!(result, Err(OtaError::Unauthorized)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let result = with_retry(&RetryPolicy::once(), |attempt| {
            if attempt == 1 {
                Err(OtaError::DuplicateVersion(Version::new(1, 0, 1)))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }
}
