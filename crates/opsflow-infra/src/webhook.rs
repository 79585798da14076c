//! Inbound webhook signature verification.
//!
//! Webhook-triggered workflows may carry a `signing_secret` on their trigger
//! node. Senders then sign the raw request body with HMAC-SHA256 and pass
//! `sha256=<hex>` in the [`SIGNATURE_HEADER`] header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Opsflow-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing {SIGNATURE_HEADER} header")]
    MissingSignature,

    #[error("webhook signature verification failed")]
    InvalidSignature,

    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),
}

/// Verify a `sha256=<hex>` (or bare hex) signature over `body`.
///
/// The comparison is constant-time via `verify_slice`.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<(), WebhookError> {
    let hex_sig = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature.trim());
    let expected = hex::decode(hex_sig).map_err(|_| WebhookError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// Verify an optional header value; a missing header fails.
pub fn verify_header(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), WebhookError> {
    let signature = header.ok_or(WebhookError::MissingSignature)?;
    verify_signature(secret, body, signature)
}

/// Produce the `sha256=<hex>` signature a sender would attach to `body`.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}
