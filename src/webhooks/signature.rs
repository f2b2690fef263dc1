//! HMAC-SHA256 request signatures.
//!
//! GitHub sends `X-Hub-Signature-256: sha256=<hex>`; the deploy provider
//! sends `X-Deploy-Signature: <base64>`. Both sign the raw request body and
//! both are compared in constant time through `Mac::verify_slice`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::WebhookError;

type HmacSha256 = Hmac<Sha256>;

const GITHUB_PREFIX: &str = "sha256=";

fn mac_for(secret: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Internal(anyhow::anyhow!("hmac init: {}", e)))?;
    mac.update(body);
    Ok(mac)
}

fn configured(secret: Option<&str>) -> Result<&str, WebhookError> {
    match secret {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(WebhookError::SecretNotConfigured),
    }
}

/// Verify a GitHub `sha256=<hex>` signature over `body`.
pub fn verify_github(secret: Option<&str>, body: &[u8], header: Option<&str>) -> Result<(), WebhookError> {
    let secret = configured(secret)?;
    let expected = header
        .and_then(|h| h.trim().strip_prefix(GITHUB_PREFIX))
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(WebhookError::SignatureValidation)?;
    mac_for(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| WebhookError::SignatureValidation)
}

/// Verify a base64 signature over `body`.
pub fn verify_deploy(secret: Option<&str>, body: &[u8], header: Option<&str>) -> Result<(), WebhookError> {
    let secret = configured(secret)?;
    let expected = header
        .and_then(|h| STANDARD.decode(h.trim()).ok())
        .ok_or(WebhookError::SignatureValidation)?;
    mac_for(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| WebhookError::SignatureValidation)
}

/// Header value GitHub would send for `body`.
pub fn sign_github(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let digest = mac_for(secret, body)?.finalize().into_bytes();
    Ok(format!("{}{}", GITHUB_PREFIX, hex::encode(digest)))
}

/// Header value the deploy provider would send for `body`.
pub fn sign_deploy(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let digest = mac_for(secret, body)?.finalize().into_bytes();
    Ok(STANDARD.encode(digest))
}
