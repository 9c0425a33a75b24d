//! Subscription HTTP Server
//!
//! Axum router for Stripe webhooks, hosted checkout and the subscription
//! pages. `main.rs` wires the concrete integrations; tests build the router
//! over in-memory fakes.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod pages;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    create_checkout_session, create_portal_session, health_check, stripe_webhook, subscription_info,
    subscription_page, success_page,
};
pub use crate::state::AppState;

/// Build the application router
pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))
        // Stripe
        .route("/subscription/stripe-webhook", post(stripe_webhook))
        .route("/subscription/create-checkout-session", post(create_checkout_session))
        .route("/subscription/create-portal-session", post(create_portal_session))
        // Pages & API
        .route("/subscription", get(subscription_page))
        .route("/subscription/success", get(success_page))
        .route("/api/subscription", get(subscription_info))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
