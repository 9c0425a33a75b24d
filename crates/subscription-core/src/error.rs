//! Error Types

use thiserror::Error;

/// Result type alias for subscription operations
pub type Result<T> = std::result::Result<T, SubscriptionError>;

/// Subscription core error types
#[derive(Error, Debug)]
pub enum SubscriptionError {
    /// Record store failure (connection, query, serialization)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Profile service answered with an HTTP error status
    #[error("Profile service error [{status}]: {message}")]
    ProfileStatus { status: u16, message: String },

    /// Profile service unreachable or timed out
    #[error("Profile service unavailable: {0}")]
    ProfileUnavailable(String),

    /// Session token did not resolve to a logged-in user
    #[error("User not logged in")]
    NotLoggedIn,

    /// Identity token could not be obtained
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Unknown plan name or price
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Invalid argument supplied by the caller
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Outbound email failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl SubscriptionError {
    /// Check if error is retryable
    ///
    /// Network failures and 5xx answers are transient. A 4xx is a permanent
    /// rejection: sending the same request again cannot succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SubscriptionError::ProfileUnavailable(_) | SubscriptionError::Storage(_) => true,
            SubscriptionError::ProfileStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            SubscriptionError::NotLoggedIn => "Please log in to manage your subscription.".into(),
            SubscriptionError::InvalidPlan(plan) => format!("The plan '{}' is not available.", plan),
            SubscriptionError::ProfileUnavailable(_) | SubscriptionError::ProfileStatus { .. } => {
                "The account service is currently unavailable. Please try again.".into()
            }
            SubscriptionError::Auth(_) => "Authentication failed. Please log in again.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for SubscriptionError {
    fn from(err: anyhow::Error) -> Self {
        SubscriptionError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SubscriptionError::ProfileUnavailable("timeout".into()).is_retryable());
        assert!(SubscriptionError::ProfileStatus { status: 503, message: "busy".into() }.is_retryable());
        assert!(!SubscriptionError::ProfileStatus { status: 404, message: "missing".into() }.is_retryable());
        assert!(!SubscriptionError::InvalidRequest("cuid is required".into()).is_retryable());
    }
}
