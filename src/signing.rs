use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::Target;

pub const SIGNATURE_HEADER: &str = "X-Bridge-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Bridge-Timestamp";

/// Headers to attach to a signed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub signature: (String, String),
    pub timestamp: (String, String),
}

/// Sign the exact bytes sent for one attempt. Returns `None` when the
/// target has no secret.
pub fn build_signature_headers(
    target: &Target,
    signed_bytes: &[u8],
    timestamp_secs: u64,
) -> Option<SignatureHeaders> {
    let secret = target.secret.as_ref()?;
    let timestamp = timestamp_secs.to_string();
    let signature = compute_signature(secret, signed_bytes, &timestamp);

    Some(SignatureHeaders {
        signature: (SIGNATURE_HEADER.to_string(), signature),
        timestamp: (TIMESTAMP_HEADER.to_string(), timestamp),
    })
}

/// Hex HMAC-SHA256 over `timestamp || payload`.
pub fn compute_signature(secret: &[u8], payload: &[u8], timestamp: &str) -> String {
    let mut mac = new_mac(secret);
    mac.update(timestamp.as_bytes());
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a received signature. Intended for receivers of forwarded events.
pub fn verify_signature(secret: &[u8], payload: &[u8], timestamp: &str, signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = new_mac(secret);
    mac.update(timestamp.as_bytes());
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

fn new_mac(secret: &[u8]) -> Hmac<Sha256> {
    // HMAC accepts keys of any length, so this cannot fail.
    <Hmac<Sha256> as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("hmac key of any length is valid"))
}
