//! Service Identity Tokens
//!
//! Calls to the profile service carry an OIDC identity token for the
//! service's audience. On Cloud Run / GCE the token comes from the metadata
//! server; in development a fixed token can be configured instead.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use subscription_core::{SubscriptionError, TokenSource};
use tokio::sync::RwLock;

use crate::error::RuntimeError;

/// Default metadata server identity endpoint
pub const METADATA_IDENTITY_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/identity";

/// Identity tokens live for an hour; refresh well before that
const TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

/// Token source backed by the GCE metadata server
pub struct MetadataTokenSource {
    client: reqwest::Client,
    endpoint: String,
    cache: RwLock<HashMap<String, (String, Instant)>>,
}

impl Default for MetadataTokenSource {
    fn default() -> Self {
        Self::new(METADATA_IDENTITY_URL)
    }
}

impl MetadataTokenSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn fetch(&self, audience: &str) -> Result<String, RuntimeError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("audience", audience)])
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuntimeError::Status {
                service: "metadata",
                status: status.as_u16(),
                message: format!("no identity token for audience {}", audience),
            });
        }

        let token = response.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(RuntimeError::Token("metadata server returned an empty token".into()));
        }
        Ok(token)
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn fetch_bearer_token(&self, audience: &str) -> subscription_core::Result<String> {
        if let Some((token, fetched_at)) = self.cache.read().await.get(audience) {
            if fetched_at.elapsed() < TOKEN_TTL {
                return Ok(token.clone());
            }
        }

        // No lock is held across the request; concurrent misses may both fetch
        let token = self.fetch(audience).await.map_err(token_error)?;
        tracing::debug!(audience = %audience, "Fetched identity token");
        self.cache
            .write()
            .await
            .insert(audience.to_string(), (token.clone(), Instant::now()));
        Ok(token)
    }
}

/// Transport failures and 5xx are transient; anything else is an auth failure
fn token_error(err: RuntimeError) -> SubscriptionError {
    if err.is_retryable() {
        SubscriptionError::ProfileUnavailable(format!("identity token: {}", err))
    } else {
        SubscriptionError::Auth(err.to_string())
    }
}

/// Fixed token, for local development against a test profile service
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch_bearer_token(&self, _audience: &str) -> subscription_core::Result<String> {
        Ok(self.token.clone())
    }
}
