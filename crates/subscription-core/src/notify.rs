//! Notifications
//!
//! Transactional email is best-effort: the request path hands a message to a
//! [`Notifier`] and moves on. Nothing here can fail a webhook.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Kinds of transactional email
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SubscriptionStarted,
    PlanChanged,
    SubscriptionCanceled,
    PaymentFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SubscriptionStarted => "subscription_started",
            NotificationKind::PlanChanged => "plan_changed",
            NotificationKind::SubscriptionCanceled => "subscription_canceled",
            NotificationKind::PaymentFailed => "payment_failed",
        }
    }
}

/// One email to send
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub to: String,
    pub variables: Map<String, Value>,
}

impl Notification {
    pub fn new(kind: NotificationKind, to: impl Into<String>) -> Self {
        Self {
            kind,
            to: to.into(),
            variables: Map::new(),
        }
    }

    pub fn with_var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }
}

/// Non-blocking hand-off of notifications
///
/// `notify` must return immediately; delivery happens elsewhere.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Email provider (`send(to, template_id, variables)`)
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, template_id: &str, variables: &Map<String, Value>) -> Result<()>;
}

/// Notifier that only logs, used when email is not configured
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            kind = notification.kind.as_str(),
            to = %notification.to,
            "Email not configured, notification dropped"
        );
    }
}
