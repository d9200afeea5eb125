//! Payment provider capability.
//!
//! The mutator only sees this trait, so a scripted double can stand in for a
//! real gateway in tests. Provider calls are not transactional; the service
//! records their outcome.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[default]
    Simulated,
    Stripe,
    PayPal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizeRequest {
    pub amount: u64,
    pub payment_method_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    pub transaction_id: String,
    pub amount: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundRequest {
    pub transaction_id: String,
    pub amount: Option<u64>,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub transaction_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capture {
    pub transaction_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Refund {
    pub refund_id: String,
}

/// A provider-reported failure. `retryable` marks failures a new request
/// may overcome (timeouts, unavailability) as opposed to declines.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderFailure {
    pub message: String,
    pub retryable: bool,
}

impl ProviderFailure {
    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderFailure>;

pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn authorize(&self, request: &AuthorizeRequest) -> ProviderResult<Authorization>;

    fn capture(&self, request: &CaptureRequest) -> ProviderResult<Capture>;

    fn refund(&self, request: &RefundRequest) -> ProviderResult<Refund>;

    /// Check a webhook body against its signature. Defaults to hex-encoded
    /// HMAC-SHA256 over the raw body.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
        verify_hmac_signature(payload, signature, secret)
    }
}

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn sign_webhook(payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex-encoded HMAC-SHA256 signature. An optional
/// `sha256=` prefix is accepted.
pub fn verify_hmac_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
