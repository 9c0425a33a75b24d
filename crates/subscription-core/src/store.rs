//! Subscription Record Store
//!
//! Single-document operations keyed by user id. No operation ever touches
//! more than one record, so no multi-record transaction is needed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::record::{SubscriptionRecord, SubscriptionUpdate};

/// Result of a conditional event write
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventWrite {
    /// The update was written
    Applied {
        previous: Option<SubscriptionRecord>,
        current: SubscriptionRecord,
    },
    /// The record was already at or past the event; nothing was written
    AlreadyApplied(SubscriptionRecord),
}

/// Subscription storage trait
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Merge `update` into the user's record, creating it if absent.
    /// `created` is set only on creation, `updated` on every call.
    async fn upsert(&self, user_id: &str, update: SubscriptionUpdate) -> Result<SubscriptionRecord>;

    /// Point lookup by user id
    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Lookup by Stripe customer id, for events that carry no user id
    async fn get_by_customer_id(&self, customer_id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Atomically compare the stored `updated` with `event_created` and write
    /// only if the record has not seen the event yet.
    async fn apply_event(
        &self,
        user_id: &str,
        update: SubscriptionUpdate,
        event_created: DateTime<Utc>,
    ) -> Result<EventWrite>;

    /// Clear `entitlement_pending` if the record was not rewritten after
    /// `written_at`. Returns whether the flag was cleared.
    async fn mark_entitlement_synced(&self, user_id: &str, written_at: DateTime<Utc>) -> Result<bool>;
}

/// In-memory subscription store (for development and tests)
pub struct MemorySubscriptionStore {
    records: RwLock<HashMap<String, SubscriptionRecord>>,
}

impl Default for MemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn upsert(&self, user_id: &str, update: SubscriptionUpdate) -> Result<SubscriptionRecord> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let record = records
            .entry(user_id.to_string())
            .or_insert_with(|| SubscriptionRecord::new(user_id, now));
        update.apply_to(record, now);
        Ok(record.clone())
    }

    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<SubscriptionRecord>> {
        let records = self.records.read().await;
        Ok(records.get(user_id).cloned())
    }

    async fn get_by_customer_id(&self, customer_id: &str) -> Result<Option<SubscriptionRecord>> {
        if customer_id.is_empty() {
            return Ok(None);
        }
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.stripe_customer_id == customer_id)
            .cloned())
    }

    async fn apply_event(
        &self,
        user_id: &str,
        update: SubscriptionUpdate,
        event_created: DateTime<Utc>,
    ) -> Result<EventWrite> {
        let now = Utc::now();
        let mut records = self.records.write().await;

        let previous = records.get(user_id).cloned();
        if let Some(existing) = &previous {
            if existing.has_seen(event_created) {
                return Ok(EventWrite::AlreadyApplied(existing.clone()));
            }
        }

        let mut current = previous
            .clone()
            .unwrap_or_else(|| SubscriptionRecord::new(user_id, now));
        update.apply_to(&mut current, now);
        records.insert(user_id.to_string(), current.clone());

        Ok(EventWrite::Applied { previous, current })
    }

    async fn mark_entitlement_synced(&self, user_id: &str, written_at: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(user_id) {
            Some(record) if record.updated == written_at && record.entitlement_pending => {
                record.entitlement_pending = false;
                record.touch(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanTier;
    use crate::record::SubscriptionStatus;
    use chrono::Duration;

    fn checkout_update() -> SubscriptionUpdate {
        SubscriptionUpdate {
            stripe_customer_id: Some("cus_1".into()),
            stripe_subscription_id: Some("sub_1".into()),
            plan_tier: Some(PlanTier::Basic),
            status: Some(SubscriptionStatus::Active),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_once_and_merges() {
        let store = MemorySubscriptionStore::new();

        let first = store.upsert("u1", checkout_update()).await.unwrap();
        let second = store
            .upsert("u1", SubscriptionUpdate::status(SubscriptionStatus::PastDue))
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(second.created, first.created);
        assert!(second.updated >= first.updated);
        assert_eq!(second.status, SubscriptionStatus::PastDue);
        assert_eq!(second.stripe_subscription_id, "sub_1");
    }

    #[tokio::test]
    async fn test_lookup_by_customer_id() {
        let store = MemorySubscriptionStore::new();
        store.upsert("u1", checkout_update()).await.unwrap();

        let found = store.get_by_customer_id("cus_1").await.unwrap();
        assert_eq!(found.map(|r| r.user_id), Some("u1".to_string()));
        assert!(store.get_by_customer_id("cus_other").await.unwrap().is_none());
        assert!(store.get_by_customer_id("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_event_skips_already_seen_events() {
        let store = MemorySubscriptionStore::new();
        let created = Utc::now() - Duration::seconds(60);

        let first = store.apply_event("u1", checkout_update(), created).await.unwrap();
        assert!(matches!(first, EventWrite::Applied { previous: None, .. }));

        let replay = store
            .apply_event("u1", SubscriptionUpdate::status(SubscriptionStatus::Canceled), created)
            .await
            .unwrap();
        match replay {
            EventWrite::AlreadyApplied(record) => {
                assert_eq!(record.status, SubscriptionStatus::Active);
            }
            other => panic!("expected AlreadyApplied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_apply_event_returns_previous_state() {
        let store = MemorySubscriptionStore::new();
        store.upsert("u1", checkout_update()).await.unwrap();

        let later = Utc::now() + Duration::seconds(60);
        let write = store
            .apply_event("u1", SubscriptionUpdate::status(SubscriptionStatus::Canceled), later)
            .await
            .unwrap();

        match write {
            EventWrite::Applied { previous, current } => {
                assert_eq!(previous.unwrap().status, SubscriptionStatus::Active);
                assert_eq!(current.status, SubscriptionStatus::Canceled);
            }
            other => panic!("expected Applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mark_synced_ignores_stale_writes() {
        let store = MemorySubscriptionStore::new();
        let first = store
            .upsert("u1", checkout_update().with_entitlement_pending(true))
            .await
            .unwrap();
        let second = store
            .upsert("u1", SubscriptionUpdate::default().with_entitlement_pending(true))
            .await
            .unwrap();

        if second.updated != first.updated {
            assert!(!store.mark_entitlement_synced("u1", first.updated).await.unwrap());
        }
        assert!(store.mark_entitlement_synced("u1", second.updated).await.unwrap());

        let record = store.get_by_user_id("u1").await.unwrap().unwrap();
        assert!(!record.entitlement_pending);
    }
}
