//! HTTP Error Responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use subscription_core::SubscriptionError;
use subscription_payments::PaymentError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error returned by handlers and extractors
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "NOT_LOGGED_IN", "Login required")
    }

    pub fn payments_disabled() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "PAYMENTS_DISABLED", "Payments not configured")
    }

    pub fn storage(err: SubscriptionError) -> Self {
        tracing::error!("Subscription store error: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", err.user_message())
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        let (status, code) = match &err {
            PaymentError::WebhookSignature(_) => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
            PaymentError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            PaymentError::InvalidPlan(_) => (StatusCode::BAD_REQUEST, "INVALID_PLAN"),
            PaymentError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PaymentError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            PaymentError::Propagation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PROPAGATION_FAILED"),
            PaymentError::Stripe(_) => (StatusCode::BAD_GATEWAY, "STRIPE_ERROR"),
            PaymentError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!(code, "Request failed: {}", err);
        } else {
            tracing::warn!(code, "Request rejected: {}", err);
        }

        Self::new(status, code, err.user_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code.into(),
            }),
        )
            .into_response()
    }
}
