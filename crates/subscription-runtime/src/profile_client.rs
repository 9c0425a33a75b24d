//! Profile Service Client
//!
//! HTTP client for the external user-profile API. Every call is authenticated
//! with an identity token for the configured audience.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use subscription_core::{PlanTier, ProfileService, SubscriptionError, TokenSource, UpdatePlanResponse, UserInfo};

use crate::error::{Result, RuntimeError};

/// Profile API configuration
#[derive(Clone, Debug)]
pub struct ProfileClientConfig {
    /// Base URL, without trailing slash
    pub base_url: String,

    /// Audience of the identity token
    pub audience: String,

    pub timeout: Duration,

    /// Fixed bearer token instead of the metadata server (development)
    pub static_token: Option<String>,
}

impl Default for ProfileClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://calil.jp/infrastructure".into(),
            audience: "https://libmuteki2.appspot.com".into(),
            timeout: Duration::from_secs(30),
            static_token: None,
        }
    }
}

impl ProfileClientConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let timeout = match std::env::var("PROFILE_API_TIMEOUT_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .map_err(|_| RuntimeError::Config(format!("invalid PROFILE_API_TIMEOUT_SECS: {}", v)))?,
            ),
            Err(_) => defaults.timeout,
        };

        Ok(Self {
            base_url: std::env::var("PROFILE_API_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            audience: std::env::var("PROFILE_API_AUDIENCE").unwrap_or(defaults.audience),
            timeout,
            static_token: std::env::var("PROFILE_API_STATIC_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        })
    }
}

#[derive(Serialize)]
struct UpdatePlanRequest<'a> {
    cuid: &'a str,
    plan_id: &'a str,
}

#[derive(Serialize)]
struct UserStatRequest<'a> {
    session_v2: &'a str,
}

/// Error body; `stat = "nouser"` marks an unknown session
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    stat: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Profile service client
pub struct ProfileClient {
    http: reqwest::Client,
    config: ProfileClientConfig,
    tokens: Arc<dyn TokenSource>,
}

impl ProfileClient {
    pub fn new(config: ProfileClientConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config, tokens })
    }

    async fn post<B: Serialize + Sync, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> subscription_core::Result<T> {
        let token = self.tokens.fetch_bearer_token(&self.config.audience).await?;
        let url = format!("{}/{}", self.config.base_url, path);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(RuntimeError::from)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await.map_err(RuntimeError::from)?);
        }

        let text = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&text).ok();
        if status == reqwest::StatusCode::NOT_FOUND
            && parsed.as_ref().and_then(|b| b.stat.as_deref()) == Some("nouser")
        {
            return Err(SubscriptionError::NotLoggedIn);
        }

        let message = parsed.and_then(|b| b.message).unwrap_or(text);
        tracing::warn!(path = %path, status = status.as_u16(), "Profile service error: {message}");
        Err(RuntimeError::Status {
            service: "profile",
            status: status.as_u16(),
            message,
        }
        .into())
    }
}

#[async_trait]
impl ProfileService for ProfileClient {
    async fn update_user_plan(&self, user_id: &str, plan: Option<PlanTier>) -> subscription_core::Result<UpdatePlanResponse> {
        if user_id.is_empty() {
            return Err(SubscriptionError::InvalidRequest("user id is required".into()));
        }

        self.post(
            "update_user_plan",
            &UpdatePlanRequest {
                cuid: user_id,
                plan_id: PlanTier::wire_id(plan),
            },
        )
        .await
    }

    async fn get_user_info(&self, session_token: &str) -> subscription_core::Result<UserInfo> {
        if session_token.is_empty() {
            return Err(SubscriptionError::NotLoggedIn);
        }

        self.post("get_userstat_v2", &UserStatRequest { session_v2: session_token })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticTokenSource;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::ServerGuard) -> ProfileClient {
        ProfileClient::new(
            ProfileClientConfig {
                base_url: server.url(),
                timeout: Duration::from_secs(2),
                ..Default::default()
            },
            Arc::new(StaticTokenSource::new("test-token")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_user_plan() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/update_user_plan")
            .match_header("authorization", "Bearer test-token")
            .match_body(Matcher::Json(json!({ "cuid": "u1", "plan_id": "Basic" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "cuid": "u1", "plan_id": "Basic", "updated_by": "billing"}"#)
            .create_async()
            .await;

        let response = client(&server)
            .update_user_plan("u1", Some(PlanTier::Basic))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.plan_id, "Basic");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_clearing_the_plan_sends_empty_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/update_user_plan")
            .match_body(Matcher::Json(json!({ "cuid": "u1", "plan_id": "" })))
            .with_status(200)
            .with_body(r#"{"success": true, "cuid": "u1", "plan_id": ""}"#)
            .create_async()
            .await;

        client(&server).update_user_plan("u1", None).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retryable_client_errors_are_not() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/update_user_plan")
            .match_body(Matcher::PartialJson(json!({ "cuid": "u500" })))
            .with_status(503)
            .create_async()
            .await;
        server
            .mock("POST", "/update_user_plan")
            .match_body(Matcher::PartialJson(json!({ "cuid": "u404" })))
            .with_status(404)
            .with_body(r#"{"message": "user not found"}"#)
            .create_async()
            .await;

        let client = client(&server);
        let unavailable = client.update_user_plan("u500", None).await.unwrap_err();
        let missing = client.update_user_plan("u404", None).await.unwrap_err();

        assert!(unavailable.is_retryable());
        assert!(!missing.is_retryable());
        assert!(matches!(missing, SubscriptionError::ProfileStatus { status: 404, ref message } if message == "user not found"));
    }

    #[tokio::test]
    async fn test_get_user_info_and_unknown_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/get_userstat_v2")
            .match_body(Matcher::Json(json!({ "session_v2": "good" })))
            .with_status(200)
            .with_body(r#"{"cuid": "u1", "email": "u1@example.com", "nickname": "Reader", "plan_id": "Pro", "stat": "ok"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/get_userstat_v2")
            .match_body(Matcher::Json(json!({ "session_v2": "stale" })))
            .with_status(404)
            .with_body(r#"{"stat": "nouser"}"#)
            .create_async()
            .await;

        let client = client(&server);
        let user = client.get_user_info("good").await.unwrap();
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.current_plan(), Some(PlanTier::Pro));

        assert!(matches!(client.get_user_info("stale").await, Err(SubscriptionError::NotLoggedIn)));
        assert!(matches!(client.get_user_info("").await, Err(SubscriptionError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_plan_update_survives_metadata_outage() {
        use crate::identity::MetadataTokenSource;
        use subscription_core::{EntitlementPropagator, RetryPolicy, RetryingPropagator};

        let mut server = mockito::Server::new_async().await;
        let outage = server
            .mock("GET", "/identity")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let identity = server
            .mock("GET", "/identity")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("id-token")
            .expect(1)
            .create_async()
            .await;
        let update = server
            .mock("POST", "/update_user_plan")
            .match_header("authorization", "Bearer id-token")
            .with_status(200)
            .with_body(r#"{"success": true, "cuid": "u1", "plan_id": "Basic"}"#)
            .expect(1)
            .create_async()
            .await;

        let profile = ProfileClient::new(
            ProfileClientConfig {
                base_url: server.url(),
                timeout: Duration::from_secs(2),
                ..Default::default()
            },
            Arc::new(MetadataTokenSource::new(format!("{}/identity", server.url()))),
        )
        .unwrap();
        let propagator = RetryingPropagator::new(Arc::new(profile), RetryPolicy::immediate(3));

        propagator.set_plan("u1", Some(PlanTier::Basic)).await.unwrap();

        outage.assert_async().await;
        identity.assert_async().await;
        update.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_user_id_is_rejected_locally() {
        let server = mockito::Server::new_async().await;
        let result = client(&server).update_user_plan("", Some(PlanTier::Pro)).await;
        assert!(matches!(result, Err(SubscriptionError::InvalidRequest(_))));
    }
}
