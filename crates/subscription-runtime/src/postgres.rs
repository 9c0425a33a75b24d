//! PostgreSQL Subscription Store
//!
//! Durable [`SubscriptionStore`] over the `user_subscriptions` table. Every
//! write runs in its own transaction holding a per-user advisory lock and the
//! row lock, so the idempotency compare and the write cannot interleave with
//! another delivery for the same user.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use subscription_core::{
    EventWrite, PlanTier, SubscriptionError, SubscriptionRecord, SubscriptionStatus, SubscriptionStore,
    SubscriptionUpdate,
};

use crate::error::{Result, RuntimeError};

/// Database configuration
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// `None` when `DATABASE_URL` is not set
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty())?;
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        Some(Self { url, max_connections })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    user_id: String,
    stripe_customer_id: String,
    stripe_subscription_id: String,
    stripe_price_id: Option<String>,
    plan_tier: Option<String>,
    plan_amount: i64,
    status: String,
    current_period_end: Option<DateTime<Utc>>,
    customer_email: Option<String>,
    entitlement_pending: bool,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = RuntimeError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        let plan_tier = match row.plan_tier.as_deref() {
            None | Some("") => None,
            Some(name) => Some(
                PlanTier::parse(name)
                    .map_err(|_| RuntimeError::Database(format!("invalid plan_tier value: {}", name)))?,
            ),
        };
        let status = SubscriptionStatus::parse(&row.status)
            .ok_or_else(|| RuntimeError::Database(format!("invalid status value: {}", row.status)))?;

        Ok(SubscriptionRecord {
            user_id: row.user_id,
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            stripe_price_id: row.stripe_price_id,
            plan_tier,
            plan_amount: row.plan_amount,
            status,
            current_period_end: row.current_period_end,
            customer_email: row.customer_email,
            entitlement_pending: row.entitlement_pending,
            created: row.created,
            updated: row.updated,
        })
    }
}

const SELECT_COLUMNS: &str = "user_id, stripe_customer_id, stripe_subscription_id, stripe_price_id, plan_tier, \
     plan_amount, status, current_period_end, customer_email, entitlement_pending, created, updated";

/// Postgres keeps microseconds; truncate so written and re-read timestamps compare equal
fn db_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// PostgreSQL implementation of the SubscriptionStore port
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| RuntimeError::Database(format!("migration failed: {}", e)))?;

        tracing::info!(max_connections = config.max_connections, "Connected to Postgres");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction that owns `user_id` and load its row
    async fn lock_user(&self, user_id: &str) -> Result<(Transaction<'static, Postgres>, Option<SubscriptionRecord>)> {
        let mut tx = self.pool.begin().await?;

        // Serializes first inserts, where there is no row to lock yet
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM user_subscriptions WHERE user_id = $1 FOR UPDATE",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let record = row.map(SubscriptionRecord::try_from).transpose()?;
        Ok((tx, record))
    }

    async fn write(tx: &mut Transaction<'static, Postgres>, record: &SubscriptionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_subscriptions (
                user_id, stripe_customer_id, stripe_subscription_id, stripe_price_id, plan_tier,
                plan_amount, status, current_period_end, customer_email, entitlement_pending,
                created, updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_id) DO UPDATE SET
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_price_id = EXCLUDED.stripe_price_id,
                plan_tier = EXCLUDED.plan_tier,
                plan_amount = EXCLUDED.plan_amount,
                status = EXCLUDED.status,
                current_period_end = EXCLUDED.current_period_end,
                customer_email = EXCLUDED.customer_email,
                entitlement_pending = EXCLUDED.entitlement_pending,
                updated = EXCLUDED.updated
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.stripe_customer_id)
        .bind(&record.stripe_subscription_id)
        .bind(&record.stripe_price_id)
        .bind(record.plan_tier.map(|p| p.as_str()))
        .bind(record.plan_amount)
        .bind(record.status.as_str())
        .bind(record.current_period_end)
        .bind(&record.customer_email)
        .bind(record.entitlement_pending)
        .bind(record.created)
        .bind(record.updated)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn upsert_inner(&self, user_id: &str, update: SubscriptionUpdate) -> Result<SubscriptionRecord> {
        let (mut tx, existing) = self.lock_user(user_id).await?;
        let now = db_now();
        let mut record = existing.unwrap_or_else(|| SubscriptionRecord::new(user_id, now));
        update.apply_to(&mut record, now);
        Self::write(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn apply_event_inner(
        &self,
        user_id: &str,
        update: SubscriptionUpdate,
        event_created: DateTime<Utc>,
    ) -> Result<EventWrite> {
        let (mut tx, previous) = self.lock_user(user_id).await?;

        if let Some(existing) = &previous {
            if existing.has_seen(event_created) {
                tx.rollback().await?;
                return Ok(EventWrite::AlreadyApplied(existing.clone()));
            }
        }

        let now = db_now();
        let mut current = previous
            .clone()
            .unwrap_or_else(|| SubscriptionRecord::new(user_id, now));
        update.apply_to(&mut current, now);
        Self::write(&mut tx, &current).await?;
        tx.commit().await?;

        Ok(EventWrite::Applied { previous, current })
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn upsert(&self, user_id: &str, update: SubscriptionUpdate) -> subscription_core::Result<SubscriptionRecord> {
        Ok(self.upsert_inner(user_id, update).await?)
    }

    async fn get_by_user_id(&self, user_id: &str) -> subscription_core::Result<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM user_subscriptions WHERE user_id = $1",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SubscriptionError::Storage(e.to_string()))?;

        Ok(row.map(SubscriptionRecord::try_from).transpose()?)
    }

    async fn get_by_customer_id(&self, customer_id: &str) -> subscription_core::Result<Option<SubscriptionRecord>> {
        if customer_id.is_empty() {
            return Ok(None);
        }

        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM user_subscriptions WHERE stripe_customer_id = $1 LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SubscriptionError::Storage(e.to_string()))?;

        Ok(row.map(SubscriptionRecord::try_from).transpose()?)
    }

    async fn apply_event(
        &self,
        user_id: &str,
        update: SubscriptionUpdate,
        event_created: DateTime<Utc>,
    ) -> subscription_core::Result<EventWrite> {
        Ok(self.apply_event_inner(user_id, update, event_created).await?)
    }

    async fn mark_entitlement_synced(&self, user_id: &str, written_at: DateTime<Utc>) -> subscription_core::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET entitlement_pending = FALSE, updated = GREATEST(updated, $3)
            WHERE user_id = $1 AND updated = $2 AND entitlement_pending
            "#,
        )
        .bind(user_id)
        .bind(written_at)
        .bind(db_now())
        .execute(&self.pool)
        .await
        .map_err(|e| SubscriptionError::Storage(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}
