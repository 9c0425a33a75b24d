//! Stripe Event Decoding
//!
//! The signed envelope is parsed once at the boundary and then decoded into
//! the closed [`WebhookEvent`] enum. Only the fields the subscription flow
//! needs are read; everything else in Stripe's objects is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use subscription_core::{PlanCatalog, PlanTier, SubscriptionStatus};

use crate::error::{PaymentError, Result};

/// Stripe event envelope
#[derive(Clone, Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix seconds at which Stripe created the event
    pub created: i64,

    #[serde(default)]
    pub livemode: bool,

    pub data: EventData,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    pub fn created_at(&self) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp(self.created, 0)
            .ok_or_else(|| PaymentError::WebhookParse(format!("invalid created timestamp {}", self.created)))
    }

    fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.data.object).map_err(|e| {
            PaymentError::WebhookParse(format!("{} object: {}", self.event_type, e))
        })
    }
}

/// An id field that Stripe sends either as `"cus_123"` or, when expanded,
/// as the full object `{"id": "cus_123", ...}`
#[derive(Deserialize)]
#[serde(untagged)]
enum Expandable {
    Id(String),
    Object { id: String },
}

fn expandable_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Expandable>::deserialize(deserializer)?.map(|e| match e {
        Expandable::Id(id) | Expandable::Object { id } => id,
    }))
}

type Metadata = HashMap<String, String>;

fn metadata_value<'a>(metadata: Option<&'a Metadata>, key: &str) -> Option<&'a str> {
    metadata
        .and_then(|m| m.get(key))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

// ---------------------------------------------------------------------------
// Raw Stripe objects
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    id: String,
    client_reference_id: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    customer: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    subscription: Option<String>,
    customer_email: Option<String>,
    customer_details: Option<RawCustomerDetails>,
    metadata: Option<Metadata>,
    line_items: Option<RawList<RawLineItem>>,
}

#[derive(Debug, Deserialize)]
struct RawCustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawLineItem {
    price: Option<RawPrice>,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    customer: Option<String>,
    status: String,
    current_period_end: Option<i64>,
    items: Option<RawList<RawSubscriptionItem>>,
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct RawSubscriptionItem {
    price: Option<RawPrice>,
    /// Newer API versions report the period on the item
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawInvoice {
    id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    customer: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    subscription: Option<String>,
    customer_email: Option<String>,
    subscription_details: Option<RawSubscriptionDetails>,
    parent: Option<RawInvoiceParent>,
    lines: Option<RawList<RawInvoiceLine>>,
}

#[derive(Debug, Deserialize)]
struct RawInvoiceParent {
    subscription_details: Option<RawSubscriptionDetails>,
}

#[derive(Debug, Deserialize)]
struct RawSubscriptionDetails {
    #[serde(default, deserialize_with = "expandable_id")]
    subscription: Option<String>,
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct RawInvoiceLine {
    period: Option<RawPeriod>,
}

#[derive(Debug, Deserialize)]
struct RawPeriod {
    end: Option<i64>,
}

// ---------------------------------------------------------------------------
// Decoded events
// ---------------------------------------------------------------------------

/// A completed hosted checkout
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutCompleted {
    pub session_id: String,
    pub client_reference_id: Option<String>,
    pub metadata_user_id: Option<String>,
    pub customer_id: String,
    pub subscription_id: String,
    pub price_id: Option<String>,
    pub plan: PlanTier,
    pub customer_email: Option<String>,
}

/// A subscription object after an update or deletion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionChanged {
    pub subscription_id: String,
    pub customer_id: String,
    pub metadata_user_id: Option<String>,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    /// `None` when the price is not in the catalog
    pub plan: Option<PlanTier>,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// An invoice payment result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvoiceSettled {
    pub invoice_id: String,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub metadata_user_id: Option<String>,
    pub customer_email: Option<String>,
    pub period_end: Option<DateTime<Utc>>,
}

/// Webhook events the service acts on
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// `checkout.session.completed`
    CheckoutCompleted(CheckoutCompleted),

    /// `customer.subscription.updated`
    SubscriptionUpdated(SubscriptionChanged),

    /// `customer.subscription.deleted`
    SubscriptionDeleted(SubscriptionChanged),

    /// `invoice.payment_succeeded` / `invoice.paid`
    InvoicePaid(InvoiceSettled),

    /// `invoice.payment_failed`
    InvoicePaymentFailed(InvoiceSettled),

    /// Anything else, acknowledged without action
    Unhandled { event_type: String },
}

impl WebhookEvent {
    /// Decode a verified envelope
    ///
    /// An error means the object of a known event type is missing fields the
    /// flow needs. Redelivering such an event cannot fix it.
    pub fn decode(event: &StripeEvent, catalog: &PlanCatalog) -> Result<Self> {
        match event.event_type.as_str() {
            "checkout.session.completed" => {
                decode_checkout(event.object()?, catalog).map(WebhookEvent::CheckoutCompleted)
            }
            "customer.subscription.updated" => {
                decode_subscription(event.object()?, catalog).map(WebhookEvent::SubscriptionUpdated)
            }
            "customer.subscription.deleted" => {
                decode_subscription(event.object()?, catalog).map(WebhookEvent::SubscriptionDeleted)
            }
            "invoice.payment_succeeded" | "invoice.paid" => {
                decode_invoice(event.object()?).map(WebhookEvent::InvoicePaid)
            }
            "invoice.payment_failed" => {
                decode_invoice(event.object()?).map(WebhookEvent::InvoicePaymentFailed)
            }
            other => Ok(WebhookEvent::Unhandled {
                event_type: other.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::CheckoutCompleted(_) => "checkout_completed",
            WebhookEvent::SubscriptionUpdated(_) => "subscription_updated",
            WebhookEvent::SubscriptionDeleted(_) => "subscription_deleted",
            WebhookEvent::InvoicePaid(_) => "invoice_paid",
            WebhookEvent::InvoicePaymentFailed(_) => "invoice_payment_failed",
            WebhookEvent::Unhandled { .. } => "unhandled",
        }
    }

    /// User ids carried by the event itself, most trusted first
    pub fn user_hints(&self) -> Vec<&str> {
        match self {
            WebhookEvent::CheckoutCompleted(c) => [c.client_reference_id.as_deref(), c.metadata_user_id.as_deref()]
                .into_iter()
                .flatten()
                .collect(),
            WebhookEvent::SubscriptionUpdated(s) | WebhookEvent::SubscriptionDeleted(s) => {
                s.metadata_user_id.as_deref().into_iter().collect()
            }
            WebhookEvent::InvoicePaid(i) | WebhookEvent::InvoicePaymentFailed(i) => {
                i.metadata_user_id.as_deref().into_iter().collect()
            }
            WebhookEvent::Unhandled { .. } => Vec::new(),
        }
    }

    /// Stripe subscription the event is about
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            WebhookEvent::CheckoutCompleted(c) => Some(&c.subscription_id),
            WebhookEvent::SubscriptionUpdated(s) | WebhookEvent::SubscriptionDeleted(s) => Some(&s.subscription_id),
            WebhookEvent::InvoicePaid(i) | WebhookEvent::InvoicePaymentFailed(i) => i.subscription_id.as_deref(),
            WebhookEvent::Unhandled { .. } => None,
        }
    }

    pub fn customer_id(&self) -> Option<&str> {
        match self {
            WebhookEvent::CheckoutCompleted(c) => Some(&c.customer_id),
            WebhookEvent::SubscriptionUpdated(s) | WebhookEvent::SubscriptionDeleted(s) => Some(&s.customer_id),
            WebhookEvent::InvoicePaid(i) | WebhookEvent::InvoicePaymentFailed(i) => Some(&i.customer_id),
            WebhookEvent::Unhandled { .. } => None,
        }
    }
}

fn missing(object: &str, field: &str) -> PaymentError {
    PaymentError::WebhookParse(format!("{} has no {}", object, field))
}

fn decode_checkout(raw: RawCheckoutSession, catalog: &PlanCatalog) -> Result<CheckoutCompleted> {
    let metadata = raw.metadata.as_ref();

    let price_id = metadata_value(metadata, "price_id")
        .map(str::to_string)
        .or_else(|| {
            raw.line_items
                .as_ref()
                .and_then(|items| items.data.first())
                .and_then(|item| item.price.as_ref())
                .map(|p| p.id.clone())
        });

    let plan = match metadata_value(metadata, "plan_name") {
        Some(name) => PlanTier::parse(name).map_err(|_| {
            PaymentError::WebhookParse(format!("checkout session {} has unknown plan {}", raw.id, name))
        })?,
        None => price_id
            .as_deref()
            .and_then(|p| catalog.tier_for_price(p))
            .ok_or_else(|| missing("checkout session", "resolvable plan"))?,
    };

    let customer_email = raw
        .customer_details
        .and_then(|d| d.email)
        .or(raw.customer_email);

    Ok(CheckoutCompleted {
        client_reference_id: raw.client_reference_id.filter(|v| !v.is_empty()),
        metadata_user_id: metadata_value(metadata, "user_id").map(str::to_string),
        customer_id: raw.customer.ok_or_else(|| missing("checkout session", "customer"))?,
        subscription_id: raw.subscription.ok_or_else(|| missing("checkout session", "subscription"))?,
        session_id: raw.id,
        price_id,
        plan,
        customer_email,
    })
}

fn decode_subscription(raw: RawSubscription, catalog: &PlanCatalog) -> Result<SubscriptionChanged> {
    let status = SubscriptionStatus::parse(&raw.status)
        .ok_or_else(|| PaymentError::WebhookParse(format!("unknown subscription status {}", raw.status)))?;

    let first_item = raw.items.as_ref().and_then(|items| items.data.first());
    let price_id = first_item.and_then(|item| item.price.as_ref()).map(|p| p.id.clone());
    let plan = price_id.as_deref().and_then(|p| catalog.tier_for_price(p));
    let current_period_end = timestamp(
        raw.current_period_end
            .or_else(|| first_item.and_then(|item| item.current_period_end)),
    );

    Ok(SubscriptionChanged {
        customer_id: raw.customer.ok_or_else(|| missing("subscription", "customer"))?,
        metadata_user_id: metadata_value(raw.metadata.as_ref(), "user_id").map(str::to_string),
        subscription_id: raw.id,
        status,
        price_id,
        plan,
        current_period_end,
    })
}

fn decode_invoice(raw: RawInvoice) -> Result<InvoiceSettled> {
    let details = raw
        .subscription_details
        .or_else(|| raw.parent.and_then(|p| p.subscription_details));
    let subscription_id = raw
        .subscription
        .or_else(|| details.as_ref().and_then(|d| d.subscription.clone()));
    let metadata_user_id = details
        .as_ref()
        .and_then(|d| metadata_value(d.metadata.as_ref(), "user_id"))
        .map(str::to_string);
    let period_end = timestamp(
        raw.lines
            .as_ref()
            .and_then(|lines| lines.data.first())
            .and_then(|line| line.period.as_ref())
            .and_then(|period| period.end),
    );

    Ok(InvoiceSettled {
        customer_id: raw.customer.ok_or_else(|| missing("invoice", "customer"))?,
        invoice_id: raw.id,
        subscription_id,
        metadata_user_id,
        customer_email: raw.customer_email,
        period_end,
    })
}
