//! Payment Error Types

use subscription_core::SubscriptionError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Stripe API error
    #[error("Stripe error: {0}")]
    Stripe(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Local record store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Plan could not be propagated to the profile service
    #[error("Propagation failed: {0}")]
    Propagation(String),

    /// Plan not configured for sale
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Customer or subscription not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    /// Check if this error is retryable
    ///
    /// Retryable webhook errors are answered with a 5xx so that Stripe
    /// redelivers the event later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::Stripe(_) | PaymentError::Storage(_) | PaymentError::Propagation(_)
        )
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::Stripe(_) => "Payment processing failed. Please try again.",
            PaymentError::InvalidPlan(_) => "The selected plan is not available.",
            PaymentError::NotFound(_) => "No subscription was found for your account.",
            PaymentError::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}

impl From<SubscriptionError> for PaymentError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::Storage(msg) => PaymentError::Storage(msg),
            SubscriptionError::InvalidPlan(plan) => PaymentError::InvalidPlan(plan),
            SubscriptionError::Config(msg) => PaymentError::Config(msg),
            other => PaymentError::Propagation(other.to_string()),
        }
    }
}

impl From<stripe::StripeError> for PaymentError {
    fn from(err: stripe::StripeError) -> Self {
        PaymentError::Stripe(err.to_string())
    }
}
