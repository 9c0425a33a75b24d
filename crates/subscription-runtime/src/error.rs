//! Runtime Error Types

use subscription_core::SubscriptionError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by the outbound integrations
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Transport failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote service answered with an error status
    #[error("{service} returned {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// Identity token could not be obtained
    #[error("Token error: {0}")]
    Token(String),

    /// Database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RuntimeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            RuntimeError::Status { status, .. } => *status >= 500 || *status == 429,
            RuntimeError::Database(_) => true,
            _ => false,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for RuntimeError {
    fn from(err: sqlx::Error) -> Self {
        RuntimeError::Database(err.to_string())
    }
}

impl From<RuntimeError> for SubscriptionError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Http(e) => SubscriptionError::ProfileUnavailable(e.to_string()),
            RuntimeError::Status { status, message, .. } => SubscriptionError::ProfileStatus { status, message },
            RuntimeError::Token(msg) => SubscriptionError::Auth(msg),
            RuntimeError::Database(msg) => SubscriptionError::Storage(msg),
            RuntimeError::Config(msg) => SubscriptionError::Config(msg),
            RuntimeError::InvalidRequest(msg) => SubscriptionError::InvalidRequest(msg),
            RuntimeError::Json(e) => SubscriptionError::Json(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = RuntimeError::Status {
            service: "profile",
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_retryable());

        let core: SubscriptionError = err.into();
        assert!(matches!(core, SubscriptionError::ProfileStatus { status: 503, .. }));
        assert!(core.is_retryable());

        let not_found: SubscriptionError = RuntimeError::Status {
            service: "profile",
            status: 404,
            message: "no user".into(),
        }
        .into();
        assert!(!not_found.is_retryable());
    }
}
