//! Application State

use std::sync::Arc;

use subscription_core::{PlanCatalog, ProfileService, SubscriptionStore};
use subscription_payments::{StripeClient, WebhookHandler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Verifies and applies Stripe events
    pub webhooks: Arc<WebhookHandler>,

    /// Subscription records (read side for the user-facing routes)
    pub store: Arc<dyn SubscriptionStore>,

    /// Resolves session cookies into users
    pub profile: Arc<dyn ProfileService>,

    /// Stripe client (optional - None if not configured)
    pub stripe: Option<Arc<StripeClient>>,

    pub catalog: Arc<PlanCatalog>,

    /// Origin used to build Stripe redirect URLs
    pub public_base_url: String,

    /// Whether email notifications are really delivered
    pub email_configured: bool,

    /// Whether records are stored in Postgres
    pub database_configured: bool,
}
