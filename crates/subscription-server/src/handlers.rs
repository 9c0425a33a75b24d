//! HTTP Handlers

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Html,
};
use serde::{Deserialize, Serialize};
use subscription_core::{PlanTier, SubscriptionInfo};
use subscription_payments::{CheckoutRequest, CheckoutSession, PortalSession, WebhookOutcome};

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::ApiError;
use crate::pages;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub stripe_configured: bool,
    pub email_configured: bool,
    pub database_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub plan_name: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        stripe_configured: state.stripe.is_some(),
        email_configured: state.email_configured,
        database_configured: state.database_configured,
    })
}

/// Stripe webhook handler
///
/// The body is taken as raw bytes: the signature covers them exactly.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers.get("stripe-signature").and_then(|v| v.to_str().ok());

    let outcome = state.webhooks.process(&body, signature).await?;

    let outcome = match outcome {
        WebhookOutcome::Applied { .. } => "applied",
        WebhookOutcome::Duplicate { .. } => "duplicate",
        WebhookOutcome::Ignored { reason } => {
            tracing::info!(reason = %reason, "Webhook acknowledged without changes");
            "ignored"
        }
    };

    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}

/// Create a Stripe Checkout session for the signed-in user
pub async fn create_checkout_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateCheckoutSessionRequest>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let stripe = state.stripe.as_ref().ok_or_else(ApiError::payments_disabled)?;

    let plan = PlanTier::parse(&payload.plan_name)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "INVALID_PLAN", e.user_message()))?;

    let record = state
        .store
        .get_by_user_id(&user.user_id)
        .await
        .map_err(ApiError::storage)?;

    if record.as_ref().is_some_and(|r| r.is_active()) {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "ALREADY_SUBSCRIBED",
            "You already have an active subscription. Use the customer portal to change plans.",
        ));
    }

    let customer_id = record
        .map(|r| r.stripe_customer_id)
        .filter(|id| !id.is_empty());

    let session = stripe
        .create_checkout_session(CheckoutRequest {
            customer_email: Some(user.email.clone()).filter(|e| !e.is_empty()),
            user_id: user.user_id,
            plan,
            customer_id,
            success_url: format!(
                "{}/subscription/success?session_id={{CHECKOUT_SESSION_ID}}",
                state.public_base_url
            ),
            cancel_url: format!("{}/subscription", state.public_base_url),
        })
        .await?;

    Ok(Json(session))
}

/// Create a Billing Portal session for the signed-in user
pub async fn create_portal_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<PortalSession>, ApiError> {
    let stripe = state.stripe.as_ref().ok_or_else(ApiError::payments_disabled)?;

    let customer_id = state
        .store
        .get_by_user_id(&user.user_id)
        .await
        .map_err(ApiError::storage)?
        .map(|r| r.stripe_customer_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                "NO_CUSTOMER",
                "No subscription was found for your account.",
            )
        })?;

    let session = stripe
        .create_portal_session(&customer_id, &format!("{}/subscription", state.public_base_url))
        .await?;

    Ok(Json(session))
}

/// Subscription status as JSON
pub async fn subscription_info(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    let record = state
        .store
        .get_by_user_id(&user.user_id)
        .await
        .map_err(ApiError::storage)?;

    Ok(Json(SubscriptionInfo::from_record(&user.user_id, record.as_ref())))
}

/// Plans and current status
pub async fn subscription_page(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> Result<Html<String>, ApiError> {
    let info = match &user {
        Some(user) => {
            let record = state
                .store
                .get_by_user_id(&user.user_id)
                .await
                .map_err(ApiError::storage)?;
            Some(SubscriptionInfo::from_record(&user.user_id, record.as_ref()))
        }
        None => None,
    };

    Ok(Html(pages::subscription_page(user.as_ref(), info.as_ref(), &state.catalog)))
}

/// Landing page after Stripe Checkout
pub async fn success_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Html<String>, ApiError> {
    let record = state
        .store
        .get_by_user_id(&user.user_id)
        .await
        .map_err(ApiError::storage)?;
    let info = SubscriptionInfo::from_record(&user.user_id, record.as_ref());

    Ok(Html(pages::success_page(&user, &info)))
}
