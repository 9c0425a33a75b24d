//! Entitlement Propagation
//!
//! Pushes the authoritative plan tier to the profile service. Transient
//! failures are retried a few times with exponential backoff; anything left
//! over is reported to the caller, whose own redelivery covers longer outages.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SubscriptionError};
use crate::plan::PlanTier;
use crate::profile::ProfileService;

/// Sets a user's effective plan in the external profile store
#[async_trait]
pub trait EntitlementPropagator: Send + Sync {
    async fn set_plan(&self, user_id: &str, plan: Option<PlanTier>) -> Result<()>;
}

/// Retry configuration
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubled after each failure
    pub base_delay: Duration,

    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Propagator that retries transient profile-service failures
pub struct RetryingPropagator {
    profile: Arc<dyn ProfileService>,
    policy: RetryPolicy,
}

impl RetryingPropagator {
    pub fn new(profile: Arc<dyn ProfileService>, policy: RetryPolicy) -> Self {
        Self { profile, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl EntitlementPropagator for RetryingPropagator {
    async fn set_plan(&self, user_id: &str, plan: Option<PlanTier>) -> Result<()> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.profile.update_user_plan(user_id, plan).await {
                Ok(response) if response.success => {
                    tracing::info!(
                        user_id = %user_id,
                        plan = %PlanTier::wire_id(plan),
                        attempt,
                        "Propagated plan to profile service"
                    );
                    return Ok(());
                }
                Ok(response) => {
                    tracing::warn!(
                        user_id = %user_id,
                        plan_id = %response.plan_id,
                        "Profile service refused plan update"
                    );
                    return Err(SubscriptionError::ProfileStatus {
                        status: 422,
                        message: "plan update not acknowledged".into(),
                    });
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(user_id = %user_id, error = %e, "Plan update rejected, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(
                        user_id = %user_id,
                        attempts = attempt,
                        error = %e,
                        "Plan update failed after all retries"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        user_id = %user_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Plan update failed, retrying: {e}"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{UpdatePlanResponse, UserInfo};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with the queued errors first, then succeeds
    struct ScriptedProfile {
        failures: Mutex<Vec<SubscriptionError>>,
        calls: AtomicUsize,
    }

    impl ScriptedProfile {
        fn new(failures: Vec<SubscriptionError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProfileService for ScriptedProfile {
        async fn update_user_plan(&self, user_id: &str, plan: Option<PlanTier>) -> Result<UpdatePlanResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
            Ok(UpdatePlanResponse {
                success: true,
                user_id: user_id.to_string(),
                plan_id: PlanTier::wire_id(plan).to_string(),
                updated_by: None,
            })
        }

        async fn get_user_info(&self, _session_token: &str) -> Result<UserInfo> {
            Err(SubscriptionError::NotLoggedIn)
        }
    }

    fn unavailable() -> SubscriptionError {
        SubscriptionError::ProfileUnavailable("connection reset".into())
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let profile = Arc::new(ScriptedProfile::new(vec![
            unavailable(),
            SubscriptionError::ProfileStatus { status: 502, message: "bad gateway".into() },
        ]));
        let propagator = RetryingPropagator::new(profile.clone(), RetryPolicy::immediate(3));

        propagator.set_plan("u1", Some(PlanTier::Basic)).await.unwrap();

        assert_eq!(profile.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let profile = Arc::new(ScriptedProfile::new(vec![unavailable(), unavailable(), unavailable(), unavailable()]));
        let propagator = RetryingPropagator::new(profile.clone(), RetryPolicy::immediate(3));

        let result = propagator.set_plan("u1", None).await;

        assert!(result.is_err());
        assert_eq!(profile.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let profile = Arc::new(ScriptedProfile::new(vec![SubscriptionError::ProfileStatus {
            status: 404,
            message: "user not found".into(),
        }]));
        let propagator = RetryingPropagator::new(profile.clone(), RetryPolicy::immediate(3));

        let result = propagator.set_plan("ghost", Some(PlanTier::Pro)).await;

        assert!(matches!(result, Err(SubscriptionError::ProfileStatus { status: 404, .. })));
        assert_eq!(profile.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
        assert_eq!(policy.delay_after(10), Duration::from_secs(2));
    }
}
