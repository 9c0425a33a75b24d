//! # subscription-core
//!
//! Subscription records and the ports the webhook core talks through.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Webhook Orchestrator                        │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌─────────────┐  │
//! │  │ SubscriptionStore│  │ Entitlement      │  │  Notifier   │  │
//! │  │ (local, durable) │  │ Propagator       │  │ (best-effort│  │
//! │  │                  │  │ (retry + backoff)│  │  email)     │  │
//! │  └──────────────────┘  └────────┬─────────┘  └─────────────┘  │
//! └─────────────────────────────────┼──────────────────────────────┘
//!                                   ▼
//!                          ProfileService (external)
//! ```
//!
//! The local record is the durability boundary. The profile service is a
//! second, independently owned store that is brought up to date after the
//! local write; the two never share a transaction.

pub mod error;
pub mod notify;
pub mod plan;
pub mod profile;
pub mod propagation;
pub mod record;
pub mod store;

pub use error::{Result, SubscriptionError};
pub use notify::{LogNotifier, Mailer, Notification, NotificationKind, Notifier};
pub use plan::{PlanCatalog, PlanPrice, PlanTier};
pub use profile::{ProfileService, TokenSource, UpdatePlanResponse, UserInfo};
pub use propagation::{EntitlementPropagator, RetryPolicy, RetryingPropagator};
pub use record::{SubscriptionInfo, SubscriptionRecord, SubscriptionStatus, SubscriptionUpdate};
pub use store::{EventWrite, MemorySubscriptionStore, SubscriptionStore};
