//! Payment callback signature verification.
//!
//! The gateway signs `"{gateway_order_id}|{payment_id}|{status}"` with
//! HMAC-SHA256 under the merchant key secret and sends the lowercase hex
//! digest. The status is part of the signed message, so a signature issued
//! for one result cannot be replayed with another.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// The signed fields of a payment callback.
#[derive(Debug, Clone, Copy)]
pub struct SignedFields<'a> {
    pub gateway_order_id: &'a str,
    pub payment_id: &'a str,
    pub status: &'a str,
}

fn digest(secret: &str, fields: SignedFields<'_>) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(fields.gateway_order_id.as_bytes());
    mac.update(b"|");
    mac.update(fields.payment_id.as_bytes());
    mac.update(b"|");
    mac.update(fields.status.as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}

/// Computes the hex signature the gateway would send for these fields.
pub fn sign(secret: &str, fields: SignedFields<'_>) -> String {
    digest(secret, fields).map(hex::encode).unwrap_or_default()
}

/// Checks a callback signature in constant time.
pub fn verify(secret: &str, fields: SignedFields<'_>, signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Some(expected) = digest(secret, fields) else {
        return false;
    };
    expected.as_slice().ct_eq(provided.as_slice()).into()
}
