//! Stripe Webhook Handling
//!
//! Processes verified Stripe events for the subscription lifecycle:
//!
//! ```text
//! verify ─▶ decode ─▶ resolve user ─▶ apply_event ─▶ notify ─▶ propagate
//!   │                                    │                        │
//!   401                            duplicate: re-sync           500 on failure
//!                                  pending entitlement
//! ```
//!
//! The local record is written first. If propagation then fails the error
//! is returned so Stripe redelivers; the redelivery is a duplicate for the
//! record but still carries `entitlement_pending`, which drives the external
//! store to the recorded state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use subscription_core::{
    EntitlementPropagator, EventWrite, Notification, NotificationKind, Notifier, PlanCatalog, PlanTier,
    SubscriptionRecord, SubscriptionStatus, SubscriptionStore, SubscriptionUpdate,
};

use crate::error::{PaymentError, Result};
use crate::event::{StripeEvent, WebhookEvent};
use crate::verifier::WebhookVerifier;

/// What happened to a delivered event. Every variant is acknowledged with 200.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The record was updated
    Applied { user_id: String, propagated: bool },

    /// The record had already seen the event
    Duplicate { user_id: String, repropagated: bool },

    /// Nothing to do
    Ignored { reason: String },
}

/// When a record write must be pushed to the profile service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Propagation {
    Always,
    IfEntitlementChanged,
    Never,
}

/// Webhook handler
pub struct WebhookHandler {
    verifier: WebhookVerifier,
    store: Arc<dyn SubscriptionStore>,
    propagator: Arc<dyn EntitlementPropagator>,
    notifier: Arc<dyn Notifier>,
    catalog: PlanCatalog,
}

impl WebhookHandler {
    pub fn new(
        verifier: WebhookVerifier,
        store: Arc<dyn SubscriptionStore>,
        propagator: Arc<dyn EntitlementPropagator>,
        notifier: Arc<dyn Notifier>,
        catalog: PlanCatalog,
    ) -> Self {
        Self {
            verifier,
            store,
            propagator,
            notifier,
            catalog,
        }
    }

    /// Verify, decode and apply one delivery
    pub async fn process(&self, payload: &[u8], signature_header: Option<&str>) -> Result<WebhookOutcome> {
        let event = self.verifier.verify(payload, signature_header)?;
        self.handle(event).await
    }

    /// Apply an already verified event
    pub async fn handle(&self, event: StripeEvent) -> Result<WebhookOutcome> {
        let created = event.created_at()?;
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            livemode = event.livemode,
            "Processing Stripe webhook"
        );

        let decoded = match WebhookEvent::decode(&event, &self.catalog) {
            Ok(WebhookEvent::Unhandled { event_type }) => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
                return Ok(WebhookOutcome::Ignored {
                    reason: format!("unhandled event type {}", event_type),
                });
            }
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(event_id = %event.id, error = %e, "Webhook object could not be decoded");
                return Ok(WebhookOutcome::Ignored { reason: e.to_string() });
            }
        };

        let Some(user_id) = self.resolve_user(&decoded).await? else {
            tracing::warn!(
                event_id = %event.id,
                customer_id = ?decoded.customer_id(),
                "No user for webhook event"
            );
            return Ok(WebhookOutcome::Ignored {
                reason: "user could not be resolved".into(),
            });
        };

        if let Some(reason) = self.superseded_subscription(&user_id, &decoded).await? {
            tracing::info!(user_id = %user_id, event_id = %event.id, "{}", reason);
            return Ok(WebhookOutcome::Ignored { reason });
        }

        let (update, propagation) = self.record_update(&decoded);
        let update = if propagation == Propagation::Never {
            update
        } else {
            update.with_entitlement_pending(true)
        };

        let write = self
            .store
            .apply_event(&user_id, update, created)
            .await
            .map_err(|e| PaymentError::Storage(e.to_string()))?;

        match write {
            EventWrite::AlreadyApplied(record) => self.resync_duplicate(record, created).await,
            EventWrite::Applied { previous, current } => {
                tracing::info!(
                    user_id = %user_id,
                    event = decoded.kind(),
                    status = %current.status,
                    plan = %PlanTier::wire_id(current.plan_tier),
                    "Subscription record updated"
                );

                if let Some(notification) = notification_for(&decoded, previous.as_ref(), &current) {
                    self.notifier.notify(notification);
                }

                // An earlier write whose propagation failed is still owed to the profile service
                let still_pending = previous.as_ref().is_some_and(|p| p.entitlement_pending);
                let must_propagate = match propagation {
                    Propagation::Always => true,
                    Propagation::IfEntitlementChanged => {
                        let before = previous.as_ref().and_then(SubscriptionRecord::entitled_plan);
                        before != current.entitled_plan() || still_pending
                    }
                    Propagation::Never => still_pending,
                };

                if must_propagate {
                    self.propagate(&current).await?;
                } else if current.entitlement_pending {
                    // Only reachable when this write set the flag itself and the plan did not move
                    self.mark_synced(&current).await;
                }

                Ok(WebhookOutcome::Applied {
                    user_id,
                    propagated: must_propagate,
                })
            }
        }
    }

    /// Map the event to a record write
    fn record_update(&self, event: &WebhookEvent) -> (SubscriptionUpdate, Propagation) {
        match event {
            WebhookEvent::CheckoutCompleted(c) => (
                SubscriptionUpdate {
                    stripe_customer_id: Some(c.customer_id.clone()),
                    stripe_subscription_id: Some(c.subscription_id.clone()),
                    stripe_price_id: c.price_id.clone(),
                    plan_tier: Some(c.plan),
                    plan_amount: Some(self.catalog.amount_for(c.plan)),
                    status: Some(SubscriptionStatus::Active),
                    customer_email: c.customer_email.clone(),
                    ..Default::default()
                },
                Propagation::Always,
            ),
            WebhookEvent::SubscriptionUpdated(s) => {
                if s.plan.is_none() {
                    tracing::warn!(
                        subscription_id = %s.subscription_id,
                        price_id = ?s.price_id,
                        "Subscription price not in catalog, plan left unchanged"
                    );
                }
                (
                    SubscriptionUpdate {
                        stripe_customer_id: Some(s.customer_id.clone()),
                        stripe_subscription_id: Some(s.subscription_id.clone()),
                        stripe_price_id: s.plan.and(s.price_id.clone()),
                        plan_tier: s.plan,
                        plan_amount: s.plan.map(|p| self.catalog.amount_for(p)),
                        status: Some(s.status),
                        current_period_end: s.current_period_end,
                        ..Default::default()
                    },
                    Propagation::IfEntitlementChanged,
                )
            }
            WebhookEvent::SubscriptionDeleted(s) => (
                SubscriptionUpdate {
                    status: Some(SubscriptionStatus::Canceled),
                    current_period_end: s.current_period_end,
                    ..Default::default()
                },
                Propagation::Always,
            ),
            WebhookEvent::InvoicePaid(i) => (
                SubscriptionUpdate {
                    status: Some(SubscriptionStatus::Active),
                    current_period_end: i.period_end,
                    customer_email: i.customer_email.clone(),
                    ..Default::default()
                },
                Propagation::Never,
            ),
            WebhookEvent::InvoicePaymentFailed(i) => (
                SubscriptionUpdate {
                    status: Some(SubscriptionStatus::PastDue),
                    customer_email: i.customer_email.clone(),
                    ..Default::default()
                },
                Propagation::Never,
            ),
            WebhookEvent::Unhandled { .. } => (SubscriptionUpdate::default(), Propagation::Never),
        }
    }

    /// Events about a subscription the user has since replaced are stale
    ///
    /// A checkout always establishes the current subscription. A concurrent
    /// checkout landing after this read is still caught by `apply_event`,
    /// since its write is newer than the event.
    async fn superseded_subscription(&self, user_id: &str, event: &WebhookEvent) -> Result<Option<String>> {
        if matches!(event, WebhookEvent::CheckoutCompleted(_)) {
            return Ok(None);
        }
        let Some(event_subscription) = event.subscription_id() else {
            return Ok(None);
        };

        let record = self
            .store
            .get_by_user_id(user_id)
            .await
            .map_err(|e| PaymentError::Storage(e.to_string()))?;

        Ok(record
            .filter(|r| !r.stripe_subscription_id.is_empty() && r.stripe_subscription_id != event_subscription)
            .map(|r| {
                format!(
                    "event for subscription {} but current subscription is {}",
                    event_subscription, r.stripe_subscription_id
                )
            }))
    }

    /// Event ids first, then the customer index
    async fn resolve_user(&self, event: &WebhookEvent) -> Result<Option<String>> {
        if let Some(user_id) = event.user_hints().into_iter().next() {
            return Ok(Some(user_id.to_string()));
        }

        let Some(customer_id) = event.customer_id() else {
            return Ok(None);
        };

        let record = self
            .store
            .get_by_customer_id(customer_id)
            .await
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        Ok(record.map(|r| r.user_id))
    }

    async fn resync_duplicate(&self, record: SubscriptionRecord, created: DateTime<Utc>) -> Result<WebhookOutcome> {
        tracing::info!(
            user_id = %record.user_id,
            event_created = %created,
            record_updated = %record.updated,
            pending = record.entitlement_pending,
            "Event already applied"
        );

        let repropagated = record.entitlement_pending;
        if repropagated {
            self.propagate(&record).await?;
        }

        Ok(WebhookOutcome::Duplicate {
            user_id: record.user_id,
            repropagated,
        })
    }

    async fn propagate(&self, record: &SubscriptionRecord) -> Result<()> {
        self.propagator
            .set_plan(&record.user_id, record.entitled_plan())
            .await
            .map_err(|e| {
                tracing::error!(
                    user_id = %record.user_id,
                    error = %e,
                    "Entitlement propagation failed, record left pending"
                );
                PaymentError::Propagation(e.to_string())
            })?;

        self.mark_synced(record).await;
        Ok(())
    }

    /// A failed clear only leaves the flag set; the next delivery re-syncs
    async fn mark_synced(&self, record: &SubscriptionRecord) {
        if let Err(e) = self
            .store
            .mark_entitlement_synced(&record.user_id, record.updated)
            .await
        {
            tracing::warn!(user_id = %record.user_id, error = %e, "Could not clear entitlement_pending");
        }
    }
}

/// Transactional email for a fresh write, if any
fn notification_for(
    event: &WebhookEvent,
    previous: Option<&SubscriptionRecord>,
    current: &SubscriptionRecord,
) -> Option<Notification> {
    let to = current.customer_email.as_deref()?;
    let plan_name = PlanTier::wire_id(current.plan_tier);

    let notification = match event {
        WebhookEvent::CheckoutCompleted(_) => Notification::new(NotificationKind::SubscriptionStarted, to)
            .with_var("plan_name", plan_name)
            .with_var("plan_amount", current.plan_amount),
        WebhookEvent::SubscriptionUpdated(_) => {
            let old_plan = previous.and_then(|p| p.plan_tier);
            if previous.is_none() || old_plan == current.plan_tier {
                return None;
            }
            Notification::new(NotificationKind::PlanChanged, to)
                .with_var("old_plan_name", PlanTier::wire_id(old_plan))
                .with_var("plan_name", plan_name)
                .with_var("plan_amount", current.plan_amount)
        }
        WebhookEvent::SubscriptionDeleted(_) => {
            let mut n = Notification::new(NotificationKind::SubscriptionCanceled, to).with_var("plan_name", plan_name);
            if let Some(end) = current.current_period_end {
                n = n.with_var("current_period_end", end.to_rfc3339());
            }
            n
        }
        WebhookEvent::InvoicePaymentFailed(_) => {
            Notification::new(NotificationKind::PaymentFailed, to).with_var("plan_name", plan_name)
        }
        WebhookEvent::InvoicePaid(_) | WebhookEvent::Unhandled { .. } => return None,
    };

    Some(notification)
}
