//! Stripe Checkout Integration
//!
//! Thin pass-throughs to Stripe's hosted pages: Checkout for buying a plan and
//! the Billing Portal for managing an existing subscription. The webhook path
//! does not depend on anything here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use stripe::{
    BillingPortalSession, CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client,
    CreateBillingPortalSession, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CustomerId,
};
use subscription_core::{PlanCatalog, PlanTier};

use crate::error::{PaymentError, Result};
use crate::verifier::DEFAULT_TOLERANCE_SECS;

/// Stripe settings
#[derive(Clone)]
pub struct StripeConfig {
    /// API key; checkout and portal are disabled without it
    pub secret_key: Option<String>,

    /// Webhook signing secret (`whsec_...`)
    pub webhook_secret: String,

    pub webhook_tolerance_secs: i64,

    pub price_ids: HashMap<PlanTier, String>,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("price_ids", &self.price_ids)
            .finish_non_exhaustive()
    }
}

impl StripeConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, test map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let webhook_secret = non_empty("STRIPE_WEBHOOK_SECRET")
            .ok_or_else(|| PaymentError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;

        let webhook_tolerance_secs = match non_empty("STRIPE_WEBHOOK_TOLERANCE_SECS") {
            Some(v) => v
                .parse()
                .map_err(|_| PaymentError::Config(format!("invalid STRIPE_WEBHOOK_TOLERANCE_SECS: {}", v)))?,
            None => DEFAULT_TOLERANCE_SECS,
        };

        let mut price_ids = HashMap::new();
        for tier in PlanTier::ALL {
            let key = format!("STRIPE_PRICE_ID_{}", tier.as_str().to_ascii_uppercase());
            if let Some(price_id) = non_empty(&key) {
                price_ids.insert(tier, price_id);
            }
        }

        Ok(Self {
            secret_key: non_empty("STRIPE_SECRET_KEY"),
            webhook_secret,
            webhook_tolerance_secs,
            price_ids,
        })
    }

    /// Tier <-> price catalog for the configured prices
    pub fn catalog(&self) -> PlanCatalog {
        PlanTier::ALL.into_iter().fold(PlanCatalog::new(), |catalog, tier| match self.price_ids.get(&tier) {
            Some(price_id) => catalog.with_price(tier, price_id.clone()),
            None => catalog,
        })
    }
}

/// Stripe client wrapper
pub struct StripeClient {
    client: Client,
    catalog: PlanCatalog,
}

impl StripeClient {
    /// Create a new Stripe client
    pub fn new(secret_key: &str, catalog: PlanCatalog) -> Self {
        Self {
            client: Client::new(secret_key),
            catalog,
        }
    }

    /// Create from config; `None` when no API key is configured
    pub fn from_config(config: &StripeConfig) -> Option<Self> {
        config
            .secret_key
            .as_deref()
            .map(|key| Self::new(key, config.catalog()))
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Create a Stripe Checkout session (Hosted approach)
    ///
    /// The user id travels as `client_reference_id` and in the session and
    /// subscription metadata, so every later event can be tied back to it.
    pub async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
        let price = self
            .catalog
            .price_for(request.plan)
            .ok_or_else(|| PaymentError::InvalidPlan(request.plan.to_string()))?;

        let metadata = HashMap::from([
            ("user_id".to_string(), request.user_id.clone()),
            ("plan_name".to_string(), request.plan.as_str().to_string()),
            ("price_id".to_string(), price.price_id.clone()),
        ]);

        let customer = match request.customer_id.as_deref() {
            Some(id) => Some(
                id.parse::<CustomerId>()
                    .map_err(|e| PaymentError::Stripe(format!("invalid customer id {}: {}", id, e)))?,
            ),
            None => None,
        };

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.client_reference_id = Some(&request.user_id);
        if customer.is_some() {
            params.customer = customer;
        } else {
            params.customer_email = request.customer_email.as_deref();
        }
        params.metadata = Some(metadata.clone());
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(metadata),
            ..Default::default()
        });
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = StripeCheckoutSession::create(&self.client, params).await?;

        let checkout_url = session
            .url
            .ok_or_else(|| PaymentError::Stripe("No checkout URL returned".into()))?;

        tracing::info!(
            user_id = %request.user_id,
            plan = %request.plan,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(CheckoutSession {
            session_id: session.id.to_string(),
            checkout_url,
        })
    }

    /// Create a Billing Portal session for an existing customer
    pub async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<PortalSession> {
        let customer = customer_id
            .parse::<CustomerId>()
            .map_err(|_| PaymentError::NotFound(format!("customer {}", customer_id)))?;

        let mut params = CreateBillingPortalSession::new(customer);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.client, params).await?;

        Ok(PortalSession {
            portal_url: session.url,
        })
    }
}

/// Request to create a checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: String,

    /// Plan to purchase
    pub plan: PlanTier,

    /// Prefills checkout for a first purchase
    #[serde(default)]
    pub customer_email: Option<String>,

    /// Reuse the Stripe customer from an earlier subscription
    #[serde(default)]
    pub customer_id: Option<String>,

    /// URL to redirect after successful payment
    pub success_url: String,

    /// URL to redirect if checkout is cancelled
    pub cancel_url: String,
}

/// Result of creating a checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalSession {
    pub portal_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_requires_webhook_secret() {
        let result = StripeConfig::from_lookup(vars(&[("STRIPE_SECRET_KEY", "sk_test")]));
        assert!(matches!(result, Err(PaymentError::Config(_))));
    }

    #[test]
    fn test_config_builds_catalog() {
        let config = StripeConfig::from_lookup(vars(&[
            ("STRIPE_WEBHOOK_SECRET", "whsec_x"),
            ("STRIPE_PRICE_ID_BASIC", "price_b"),
            ("STRIPE_PRICE_ID_PRO", "price_p"),
            ("STRIPE_PRICE_ID_STANDARD", ""),
        ]))
        .unwrap();

        assert!(config.secret_key.is_none());
        assert_eq!(config.webhook_tolerance_secs, DEFAULT_TOLERANCE_SECS);

        let catalog = config.catalog();
        assert_eq!(catalog.tier_for_price("price_p"), Some(PlanTier::Pro));
        assert!(catalog.price_for(PlanTier::Standard).is_none());
        assert!(StripeClient::from_config(&config).is_none());
    }

    #[tokio::test]
    async fn test_checkout_for_unpriced_plan_is_rejected() {
        let client = StripeClient::new("sk_test_123", PlanCatalog::new().with_price(PlanTier::Basic, "price_b"));

        let result = client
            .create_checkout_session(CheckoutRequest {
                user_id: "u1".into(),
                plan: PlanTier::Pro,
                customer_email: None,
                customer_id: None,
                success_url: "https://example.com/ok".into(),
                cancel_url: "https://example.com/cancel".into(),
            })
            .await;

        assert!(matches!(result, Err(PaymentError::InvalidPlan(_))));
    }
}
