//! SendGrid Mailer
//!
//! Sends dynamic-template email through the SendGrid v3 API.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::Duration;
use subscription_core::{Mailer, NotificationKind, SubscriptionError};

use crate::error::{Result, RuntimeError};

pub const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Email configuration
#[derive(Clone)]
pub struct MailerConfig {
    pub api_key: String,
    pub from: String,
    pub api_url: String,
    /// Dynamic template id per notification kind
    pub templates: HashMap<NotificationKind, String>,
}

impl std::fmt::Debug for MailerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailerConfig")
            .field("from", &self.from)
            .field("api_url", &self.api_url)
            .field("templates", &self.templates)
            .finish_non_exhaustive()
    }
}

impl MailerConfig {
    /// `None` when `SENDGRID_API_KEY` is not set
    pub fn from_env() -> Result<Option<Self>> {
        let Some(api_key) = std::env::var("SENDGRID_API_KEY").ok().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        let from = std::env::var("EMAIL_FROM")
            .map_err(|_| RuntimeError::Config("EMAIL_FROM must be set with SENDGRID_API_KEY".into()))?;

        let mut templates = HashMap::new();
        for (kind, key) in [
            (NotificationKind::SubscriptionStarted, "EMAIL_TEMPLATE_SUBSCRIPTION_STARTED"),
            (NotificationKind::PlanChanged, "EMAIL_TEMPLATE_PLAN_CHANGED"),
            (NotificationKind::SubscriptionCanceled, "EMAIL_TEMPLATE_SUBSCRIPTION_CANCELED"),
            (NotificationKind::PaymentFailed, "EMAIL_TEMPLATE_PAYMENT_FAILED"),
        ] {
            if let Ok(id) = std::env::var(key) {
                templates.insert(kind, id);
            }
        }

        Ok(Some(Self {
            api_key,
            from,
            api_url: SENDGRID_API_URL.into(),
            templates,
        }))
    }

    pub fn template_for(&self, kind: NotificationKind) -> Option<&str> {
        self.templates.get(&kind).map(String::as_str)
    }
}

/// SendGrid v3 mailer
pub struct SendGridMailer {
    http: reqwest::Client,
    config: MailerConfig,
}

impl SendGridMailer {
    pub fn new(config: MailerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &MailerConfig {
        &self.config
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, to: &str, template_id: &str, variables: &Map<String, Value>) -> subscription_core::Result<()> {
        let body = json!({
            "from": { "email": self.config.from },
            "personalizations": [{
                "to": [{ "email": to }],
                "dynamic_template_data": variables,
            }],
            "template_id": template_id,
        });

        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SubscriptionError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SubscriptionError::Notification(format!("SendGrid returned {}: {}", status, text)));
        }
        Ok(())
    }
}
