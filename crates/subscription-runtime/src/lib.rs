//! # subscription-runtime
//!
//! Concrete integrations behind the `subscription-core` ports.
//!
//! ## Integrations
//!
//! - **Profile API**: [`ProfileClient`] implements `ProfileService` over HTTP
//! - **Identity**: [`MetadataTokenSource`] (GCE metadata server) or [`StaticTokenSource`]
//! - **Email**: [`SendGridMailer`] behind the [`NotificationQueue`] worker
//! - **Postgres** (default feature): [`PostgresSubscriptionStore`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use subscription_runtime::{MetadataTokenSource, ProfileClient, ProfileClientConfig};
//!
//! let profile = ProfileClient::new(
//!     ProfileClientConfig::from_env()?,
//!     Arc::new(MetadataTokenSource::default()),
//! )?;
//! let propagator = RetryingPropagator::new(Arc::new(profile), RetryPolicy::default());
//! ```

pub mod error;
pub mod identity;
pub mod mailer;
pub mod profile_client;
pub mod queue;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{Result, RuntimeError};
pub use identity::{MetadataTokenSource, StaticTokenSource};
pub use mailer::{MailerConfig, SendGridMailer};
pub use profile_client::{ProfileClient, ProfileClientConfig};
pub use queue::{NotificationQueue, NotificationWorker};

#[cfg(feature = "postgres")]
pub use postgres::{DatabaseConfig, PostgresSubscriptionStore};
