//! Stripe Webhook Signature Verification
//!
//! Stripe signs `"{timestamp}.{raw body}"` with HMAC-SHA256 and sends the
//! result in the `Stripe-Signature` header:
//!
//! ```text
//! Stripe-Signature: t=1700000000,v1=5257a869e7...,v0=6ffbb59b2300...
//! ```
//!
//! The signature covers the exact bytes on the wire, so verification must run
//! on the raw body before any JSON parsing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PaymentError, Result};
use crate::event::StripeEvent;

type HmacSha256 = Hmac<Sha256>;

/// Default tolerance between the signature timestamp and now
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// All `v1` signatures (several are sent while a secret is rolled)
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| PaymentError::WebhookSignature("malformed signature header".into()))?;

            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        PaymentError::WebhookSignature("invalid signature timestamp".into())
                    })?);
                }
                "v1" => {
                    // A non-hex candidate can never match; skip it
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| PaymentError::WebhookSignature("missing timestamp".into()))?;
        if signatures.is_empty() {
            return Err(PaymentError::WebhookSignature("missing v1 signature".into()));
        }

        Ok(Self { timestamp, signatures })
    }
}

/// Verifies webhook payloads against the shared signing secret
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verify the signature and parse the trusted event
    pub fn verify(&self, payload: &[u8], signature_header: Option<&str>) -> Result<StripeEvent> {
        self.verify_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    /// Same as [`verify`](Self::verify) with an explicit clock
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
        now: i64,
    ) -> Result<StripeEvent> {
        let header = signature_header
            .ok_or_else(|| PaymentError::WebhookSignature("missing Stripe-Signature header".into()))?;
        let header = SignatureHeader::parse(header)?;

        // `t` is unauthenticated here; an out-of-range value must not overflow
        let tolerance = u64::try_from(self.tolerance_secs).unwrap_or(0);
        let within = now
            .checked_sub(header.timestamp)
            .map(i64::unsigned_abs)
            .is_some_and(|skew| skew <= tolerance);
        if !within {
            return Err(PaymentError::WebhookSignature(
                "timestamp outside the tolerance zone".into(),
            ));
        }

        let mac = self.mac_for(header.timestamp, payload)?;
        let matched = header
            .signatures
            .iter()
            .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
        if !matched {
            return Err(PaymentError::WebhookSignature("no matching signature".into()));
        }

        serde_json::from_slice(payload).map_err(|e| PaymentError::WebhookParse(e.to_string()))
    }

    /// Build a valid `Stripe-Signature` header for `payload`
    pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let verifier = Self::new(secret);
        let signature = verifier
            .mac_for(timestamp, payload)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        format!("t={},v1={}", timestamp, signature)
    }

    fn mac_for(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| PaymentError::Config(format!("invalid webhook secret: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}
