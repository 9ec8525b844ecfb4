//! Edge-safe token verifier.
//!
//! The session gate runs in a constrained request-filter environment that
//! cannot assume the full `TokenService` is linked in, so verification is
//! reimplemented here from the canonical wire format documented in
//! `token.rs` — deliberately sharing no code with it. Both implementations
//! are held to the same test-vector table in `tests/token_vectors.rs`.
//!
//! Verification is pure and synchronous: split on the single `.`, recompute
//! HMAC-SHA256 over the encoded payload, compare in constant time, then
//! check `purpose` and `exp`. Every rejection is `None`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Verify a token against `expected_purpose` at `now_unix` seconds.
/// Returns the subject email on success.
pub fn verify_token(
    secret: &[u8],
    expected_purpose: &str,
    token: &str,
    now_unix: i64,
) -> Option<String> {
    let mut halves = token.splitn(2, '.');
    let encoded = halves.next()?;
    let provided_sig = halves.next()?;
    if encoded.is_empty() || provided_sig.is_empty() {
        return None;
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret).ok()?;
    mac.update(encoded.as_bytes());
    let expected = mac.finalize().into_bytes();

    let provided = URL_SAFE_NO_PAD.decode(provided_sig).ok()?;
    if !bool::from(expected.as_slice().ct_eq(&provided)) {
        return None;
    }

    let payload_bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).ok()?;

    if payload.get("purpose").and_then(|v| v.as_str()) != Some(expected_purpose) {
        return None;
    }
    let exp = payload.get("exp").and_then(|v| v.as_i64())?;
    if exp <= now_unix {
        return None;
    }
    payload
        .get("sub")
        .and_then(|v| v.as_str())
        .map(String::from)
}
