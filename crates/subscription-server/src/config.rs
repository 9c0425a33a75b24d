//! Application Configuration
//!
//! Built once in `main` from the environment and passed down. Nothing below
//! the server reads environment variables on its own.

use std::time::Duration;
use subscription_core::RetryPolicy;
use subscription_payments::{PaymentError, StripeConfig};
use subscription_runtime::{DatabaseConfig, MailerConfig, ProfileClientConfig, RuntimeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Stripe(#[from] PaymentError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// HTTP listener settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Externally visible origin, used for Stripe redirect URLs
    pub public_base_url: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| "http://localhost:3000".into());
        Self {
            bind_addr,
            public_base_url,
        }
    }
}

/// Everything the server needs, resolved up front
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub stripe: StripeConfig,
    pub profile: ProfileClientConfig,
    pub mailer: Option<MailerConfig>,
    pub database: Option<DatabaseConfig>,
    pub retry: RetryPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env(),
            stripe: StripeConfig::from_env()?,
            profile: ProfileClientConfig::from_env()?,
            mailer: MailerConfig::from_env()?,
            database: DatabaseConfig::from_env(),
            retry: retry_policy_from_env()?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(None),
    }
}

fn retry_policy_from_env() -> Result<RetryPolicy, ConfigError> {
    let mut policy = RetryPolicy::default();
    if let Some(attempts) = parse_var::<u32>("PROPAGATION_MAX_ATTEMPTS")? {
        policy.max_attempts = attempts.max(1);
    }
    if let Some(ms) = parse_var::<u64>("PROPAGATION_BASE_DELAY_MS")? {
        policy.base_delay = Duration::from_millis(ms);
    }
    Ok(policy)
}
