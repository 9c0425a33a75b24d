//! Subscription Webhook Server
//!
//! Receives Stripe webhooks, keeps the per-user subscription records and
//! pushes plan changes to the profile service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subscription_core::{
    LogNotifier, MemorySubscriptionStore, Notifier, ProfileService, RetryingPropagator, SubscriptionStore,
    TokenSource,
};
use subscription_payments::{StripeClient, WebhookHandler, WebhookVerifier};
use subscription_runtime::{
    MetadataTokenSource, NotificationQueue, PostgresSubscriptionStore, ProfileClient, SendGridMailer,
    StaticTokenSource, queue::DEFAULT_CAPACITY,
};
use subscription_server::{AppState, config::AppConfig, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    // Record store
    let store: Arc<dyn SubscriptionStore> = match &config.database {
        Some(db) => {
            let store = PostgresSubscriptionStore::connect(db).await?;
            tracing::info!("✓ Postgres subscription store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("⚠ DATABASE_URL not set - records kept in memory only");
            Arc::new(MemorySubscriptionStore::new())
        }
    };

    // Profile service
    let tokens: Arc<dyn TokenSource> = match &config.profile.static_token {
        Some(token) => {
            tracing::warn!("⚠ Using static profile API token");
            Arc::new(StaticTokenSource::new(token.clone()))
        }
        None => Arc::new(MetadataTokenSource::default()),
    };
    let profile: Arc<dyn ProfileService> = Arc::new(ProfileClient::new(config.profile.clone(), tokens)?);
    tracing::info!(base_url = %config.profile.base_url, "✓ Profile service client");

    let propagator = Arc::new(RetryingPropagator::new(profile.clone(), config.retry.clone()));

    // Notifications
    let (notifier, worker) = match &config.mailer {
        Some(mailer_config) => {
            let mailer = Arc::new(SendGridMailer::new(mailer_config.clone())?);
            let (queue, worker) = NotificationQueue::start(mailer, mailer_config, DEFAULT_CAPACITY);
            tracing::info!(templates = mailer_config.templates.len(), "✓ SendGrid email");
            (Arc::new(queue) as Arc<dyn Notifier>, Some(worker))
        }
        None => {
            tracing::warn!("⚠ SENDGRID_API_KEY not set - notifications are only logged");
            (Arc::new(LogNotifier) as Arc<dyn Notifier>, None)
        }
    };

    // Payments
    let catalog = config.stripe.catalog();
    for price in catalog.prices() {
        tracing::info!("  Plan {} -> {}", price.tier, price.price_id);
    }
    let stripe = StripeClient::from_config(&config.stripe);
    if stripe.is_some() {
        tracing::info!("✓ Stripe configured");
    } else {
        tracing::warn!("⚠ Stripe API key not configured - checkout disabled");
        tracing::warn!("  Set STRIPE_SECRET_KEY in .env");
    }

    let webhooks = WebhookHandler::new(
        WebhookVerifier::new(config.stripe.webhook_secret.clone())
            .with_tolerance(config.stripe.webhook_tolerance_secs),
        store.clone(),
        propagator,
        notifier,
        catalog.clone(),
    );

    // Build application state
    let state = AppState {
        webhooks: Arc::new(webhooks),
        store,
        profile,
        stripe: stripe.map(Arc::new),
        catalog: Arc::new(catalog),
        public_base_url: config.server.public_base_url.clone(),
        email_configured: worker.is_some(),
        database_configured: config.database.is_some(),
    };

    let app = router(state);

    // Start server
    let addr = config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 subscription server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                                - Health check");
    tracing::info!("  POST /subscription/stripe-webhook           - Stripe webhook");
    tracing::info!("  POST /subscription/create-checkout-session  - Start checkout");
    tracing::info!("  POST /subscription/create-portal-session    - Open billing portal");
    tracing::info!("  GET  /subscription                          - Plans and status");
    tracing::info!("  GET  /subscription/success                  - Checkout complete");
    tracing::info!("  GET  /api/subscription                      - Status as JSON");
    tracing::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and every queue handle in it) is dropped by now
    if let Some(worker) = worker {
        let delivered = worker.shutdown().await;
        tracing::info!(delivered, "Notification queue drained");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
