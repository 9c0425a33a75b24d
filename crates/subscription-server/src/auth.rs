//! Session Authentication
//!
//! The signed-in user is identified by the `session_v2` cookie set by the main
//! site (or an `Authorization: Bearer` header carrying the same token), which
//! the profile service resolves into a [`UserInfo`].

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;
use subscription_core::{SubscriptionError, UserInfo};

use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "session_v2";

/// Session token from the cookie, falling back to a bearer header
pub fn session_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<UserInfo>, ApiError> {
    let Some(token) = session_token(parts) else {
        return Ok(None);
    };

    match state.profile.get_user_info(&token).await {
        Ok(user) => Ok(Some(user)),
        Err(SubscriptionError::NotLoggedIn | SubscriptionError::InvalidRequest(_)) => Ok(None),
        Err(SubscriptionError::ProfileStatus { status, .. }) if status < 500 => Ok(None),
        Err(e) => {
            tracing::error!(error = %e, "Session lookup failed");
            Err(ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "PROFILE_UNAVAILABLE",
                e.user_message(),
            ))
        }
    }
}

/// Signed-in user; rejects with 401 otherwise
#[derive(Clone, Debug)]
pub struct CurrentUser(pub UserInfo);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(parts, state)
            .await?
            .map(CurrentUser)
            .ok_or_else(ApiError::unauthorized)
    }
}

/// Signed-in user if there is one
#[derive(Clone, Debug)]
pub struct MaybeUser(pub Option<UserInfo>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // A broken profile service must not take the public page down
        Ok(MaybeUser(resolve(parts, state).await.unwrap_or(None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: (&str, &str)) -> Parts {
        Request::builder()
            .header(header.0, header.1)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn test_cookie_is_preferred() {
        let p = parts(("cookie", "other=1; session_v2=abc"));
        assert_eq!(session_token(&p).as_deref(), Some("abc"));
    }

    #[test]
    fn test_bearer_fallback_and_empty_values() {
        assert_eq!(session_token(&parts(("authorization", "Bearer xyz"))).as_deref(), Some("xyz"));
        assert_eq!(session_token(&parts(("authorization", "Basic xyz"))), None);
        assert_eq!(session_token(&parts(("cookie", "session_v2="))), None);
    }
}
