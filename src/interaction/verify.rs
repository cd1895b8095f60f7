//! HMAC-SHA256 verification of inbound GitHub webhooks.
//!
//! Verification runs on the exact bytes received. Anything other than a matching
//! `sha256=<hex>` signature is rejected.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Why a webhook was not verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("Missing signature")]
    MissingSignature,
    #[error("Invalid signature")]
    InvalidSignature,
}

/// Signs a payload and returns the header value GitHub would send.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, VerifyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| VerifyError::InvalidSignature)?;
    mac.update(body);

    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Verifies a signature header against the raw request body.
///
/// The comparison is constant time. An empty secret never verifies.
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> Result<(), VerifyError> {
    let signature = signature.ok_or(VerifyError::MissingSignature)?;

    if secret.is_empty() {
        return Err(VerifyError::InvalidSignature);
    }

    let provided = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|hex_digest| hex::decode(hex_digest.trim()).ok())
        .ok_or(VerifyError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| VerifyError::InvalidSignature)?;
    mac.update(body);

    mac.verify_slice(&provided).map_err(|_| VerifyError::InvalidSignature)
}
