//! # subscription-payments
//!
//! Stripe side of the subscription service: webhook verification, event
//! decoding, the webhook orchestrator and hosted checkout.
//!
//! ## Webhook flow
//!
//! ```text
//! ┌────────┐  POST + Stripe-Signature  ┌──────────────────┐
//! │ Stripe │──────────────────────────▶│  WebhookHandler  │
//! └────────┘ ◀──── 200 / 400 / 401 / 500 ┤                  │
//!                                       │ verify → decode  │
//!                                       │ → record write   │
//!                                       │ → notify         │
//!                                       │ → propagate plan │
//!                                       └──────────────────┘
//! ```
//!
//! A 5xx makes Stripe redeliver the event, which is how a failed propagation
//! is eventually completed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use subscription_payments::{StripeConfig, WebhookHandler, WebhookVerifier};
//!
//! let config = StripeConfig::from_env()?;
//! let handler = WebhookHandler::new(
//!     WebhookVerifier::new(&config.webhook_secret),
//!     store,
//!     propagator,
//!     notifier,
//!     config.catalog(),
//! );
//!
//! let outcome = handler.process(&body, signature_header).await?;
//! ```

mod checkout;
mod error;
mod event;
mod verifier;
mod webhook;

pub use checkout::{CheckoutRequest, CheckoutSession, PortalSession, StripeClient, StripeConfig};
pub use error::{PaymentError, Result};
pub use event::{CheckoutCompleted, InvoiceSettled, StripeEvent, SubscriptionChanged, WebhookEvent};
pub use verifier::{DEFAULT_TOLERANCE_SECS, SignatureHeader, WebhookVerifier};
pub use webhook::{WebhookHandler, WebhookOutcome};
