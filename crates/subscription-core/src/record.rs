//! Subscription Records
//!
//! The local, authoritative view of one user's subscription. There is exactly
//! one record per user id; writes merge into it and never delete it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlanTier;

/// Stripe subscription lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Trialing,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            "paused" => Some(SubscriptionStatus::Paused),
            _ => None,
        }
    }

    /// Terminal states: the subscription can no longer become active
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Canceled | SubscriptionStatus::IncompleteExpired
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's subscription document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Document key: the profile service's user id
    pub user_id: String,

    /// Stripe customer (stable across plan changes)
    pub stripe_customer_id: String,

    /// Stripe subscription (changes across cancel/resubscribe)
    pub stripe_subscription_id: String,

    /// Price that produced `plan_tier`
    pub stripe_price_id: Option<String>,

    /// Purchased tier; `None` when no plan was ever bought
    pub plan_tier: Option<PlanTier>,

    /// Informational amount, not authoritative for billing
    pub plan_amount: i64,

    pub status: SubscriptionStatus,

    /// End of the current billing period, as reported by Stripe
    pub current_period_end: Option<DateTime<Utc>>,

    /// Address for transactional email
    pub customer_email: Option<String>,

    /// A local write happened whose propagation is not yet confirmed
    pub entitlement_pending: bool,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Empty record for a user seen for the first time
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            stripe_customer_id: String::new(),
            stripe_subscription_id: String::new(),
            stripe_price_id: None,
            plan_tier: None,
            plan_amount: 0,
            status: SubscriptionStatus::Incomplete,
            current_period_end: None,
            customer_email: None,
            entitlement_pending: false,
            created: now,
            updated: now,
        }
    }

    /// The plan the user is entitled to right now
    pub fn entitled_plan(&self) -> Option<PlanTier> {
        if self.status.is_terminal() {
            None
        } else {
            self.plan_tier
        }
    }

    /// Only `active` counts; a trial is entitled but not yet a paid subscription
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Refresh `updated`, never moving it backwards
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated {
            self.updated = now;
        }
    }

    /// Whether an event created at `event_created` was already applied
    pub fn has_seen(&self, event_created: DateTime<Utc>) -> bool {
        self.updated >= event_created
    }
}

/// A partial write: `Some` fields overwrite, `None` fields are kept
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub plan_tier: Option<PlanTier>,
    pub plan_amount: Option<i64>,
    pub status: Option<SubscriptionStatus>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub customer_email: Option<String>,
    pub entitlement_pending: Option<bool>,
}

impl SubscriptionUpdate {
    pub fn status(status: SubscriptionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_entitlement_pending(mut self, pending: bool) -> Self {
        self.entitlement_pending = Some(pending);
        self
    }

    /// Merge into `record` and refresh its `updated` timestamp
    pub fn apply_to(self, record: &mut SubscriptionRecord, now: DateTime<Utc>) {
        if let Some(v) = self.stripe_customer_id {
            record.stripe_customer_id = v;
        }
        if let Some(v) = self.stripe_subscription_id {
            record.stripe_subscription_id = v;
        }
        if let Some(v) = self.stripe_price_id {
            record.stripe_price_id = Some(v);
        }
        if let Some(v) = self.plan_tier {
            record.plan_tier = Some(v);
        }
        if let Some(v) = self.plan_amount {
            record.plan_amount = v;
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = self.current_period_end {
            record.current_period_end = Some(v);
        }
        if let Some(v) = self.customer_email {
            record.customer_email = Some(v);
        }
        if let Some(v) = self.entitlement_pending {
            record.entitlement_pending = v;
        }
        record.touch(now);
    }
}

/// Subscription summary returned to the signed-in user
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub cuid: String,
    pub plan_name: Option<String>,
    pub plan_amount: Option<i64>,
    pub subscription_status: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl SubscriptionInfo {
    pub fn from_record(user_id: &str, record: Option<&SubscriptionRecord>) -> Self {
        match record {
            Some(r) => Self {
                cuid: user_id.to_string(),
                plan_name: r.plan_tier.map(|p| p.as_str().to_string()),
                plan_amount: Some(r.plan_amount),
                subscription_status: Some(r.status.as_str().to_string()),
                current_period_end: r.current_period_end,
                is_active: r.is_active(),
            },
            None => Self {
                cuid: user_id.to_string(),
                plan_name: None,
                plan_amount: None,
                subscription_status: None,
                current_period_end: None,
                is_active: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_update_merges_only_set_fields() {
        let now = Utc::now();
        let mut record = SubscriptionRecord::new("u1", now);
        record.stripe_customer_id = "cus_1".into();
        record.plan_tier = Some(PlanTier::Basic);

        SubscriptionUpdate::status(SubscriptionStatus::PastDue).apply_to(&mut record, now);

        assert_eq!(record.status, SubscriptionStatus::PastDue);
        assert_eq!(record.stripe_customer_id, "cus_1");
        assert_eq!(record.plan_tier, Some(PlanTier::Basic));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let now = Utc::now();
        let mut record = SubscriptionRecord::new("u1", now);

        record.touch(now - Duration::seconds(30));
        assert_eq!(record.updated, now);

        record.touch(now + Duration::seconds(30));
        assert_eq!(record.updated, now + Duration::seconds(30));
        assert_eq!(record.created, now);
    }

    #[test]
    fn test_canceled_record_has_no_entitlement() {
        let mut record = SubscriptionRecord::new("u1", Utc::now());
        record.plan_tier = Some(PlanTier::Pro);
        record.status = SubscriptionStatus::PastDue;
        assert_eq!(record.entitled_plan(), Some(PlanTier::Pro));

        record.status = SubscriptionStatus::Canceled;
        assert_eq!(record.entitled_plan(), None);
        assert_eq!(record.plan_tier, Some(PlanTier::Pro));
    }

    #[test]
    fn test_status_wire_names() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::IncompleteExpired,
            SubscriptionStatus::Paused,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(
            serde_json::to_string(&SubscriptionStatus::PastDue).unwrap(),
            "\"past_due\""
        );
    }

    #[test]
    fn test_only_active_status_is_active() {
        let mut record = SubscriptionRecord::new("u1", Utc::now());
        record.plan_tier = Some(PlanTier::Basic);

        record.status = SubscriptionStatus::Active;
        assert!(record.is_active());
        assert!(SubscriptionInfo::from_record("u1", Some(&record)).is_active);

        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::Canceled,
        ] {
            record.status = status;
            assert!(!record.is_active(), "{} reported active", status);
            assert!(!SubscriptionInfo::from_record("u1", Some(&record)).is_active);
        }
    }

    #[test]
    fn test_info_for_missing_record() {
        let info = SubscriptionInfo::from_record("u1", None);
        assert!(!info.is_active);
        assert!(info.plan_name.is_none());
    }
}
