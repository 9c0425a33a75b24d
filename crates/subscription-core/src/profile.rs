//! Profile Service Ports
//!
//! The external, independently operated user-profile service holds each
//! user's effective plan. The webhook core writes to it; the web surface reads
//! from it to identify the signed-in user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::PlanTier;

/// User as known by the profile service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "cuid")]
    pub user_id: String,

    pub email: String,

    #[serde(rename = "nickname")]
    pub display_name: String,

    /// Current plan on the profile side ("" when none)
    #[serde(default)]
    pub plan_id: String,

    #[serde(default)]
    pub stat: Option<String>,

    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl UserInfo {
    /// Parsed plan; an unknown plan id is treated as no plan
    pub fn current_plan(&self) -> Option<PlanTier> {
        PlanTier::from_wire_id(&self.plan_id).ok().flatten()
    }
}

/// Answer to a plan update
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePlanResponse {
    pub success: bool,

    #[serde(rename = "cuid")]
    pub user_id: String,

    pub plan_id: String,

    #[serde(default)]
    pub updated_by: Option<String>,
}

/// Client side of the profile service
#[async_trait]
pub trait ProfileService: Send + Sync {
    /// Set the user's effective plan (`None` clears it). Naturally idempotent.
    async fn update_user_plan(&self, user_id: &str, plan: Option<PlanTier>) -> Result<UpdatePlanResponse>;

    /// Resolve a session token into the signed-in user
    async fn get_user_info(&self, session_token: &str) -> Result<UserInfo>;
}

/// Source of service-identity bearer tokens
///
/// Implementations fetch a token for the given audience from the hosting
/// environment, or return a fixed token in development.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_bearer_token(&self, audience: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_info_from_wire() {
        let json = serde_json::json!({
            "stat": "ok",
            "userkey": "calil:test123",
            "cuid": "1234567890",
            "email": "test@example.com",
            "nickname": "Test User",
            "service": "google",
            "plan_id": "Basic",
            "date": "2023-01-01 00:00:00.000000",
            "update": "2023-10-01 00:00:00.000000"
        });

        let info: UserInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.user_id, "1234567890");
        assert_eq!(info.display_name, "Test User");
        assert_eq!(info.current_plan(), Some(PlanTier::Basic));
    }

    #[test]
    fn test_user_info_without_plan() {
        let json = serde_json::json!({
            "cuid": "u1",
            "email": "a@example.com",
            "nickname": "A",
            "plan_id": ""
        });

        let info: UserInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.current_plan(), None);
    }
}
