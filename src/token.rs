//! Stateless signed tokens for magic links, approve links and sessions.
//!
//! Canonical wire format (normative — the edge verifier in `edge.rs` is an
//! independent implementation of exactly this):
//!
//! ```text
//! token   = b64url_nopad(payload) "." b64url_nopad(HMAC_SHA256(secret, b64url_nopad(payload)))
//! payload = {"sub":<email>,"purpose":"magic"|"approve"|"session","iat":<secs>,"exp":<secs>}
//! ```
//!
//! Field order in the payload is fixed (struct declaration order, no
//! whitespace) so both call paths produce byte-identical tokens. Tokens are
//! valid iff the signature matches and `exp` is in the future; there is no
//! revocation. All verification failures collapse to `None` so callers can
//! never distinguish "bad signature" from "expired".

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Magic,
    Approve,
    Session,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Magic => "magic",
            TokenPurpose::Approve => "approve",
            TokenPurpose::Session => "session",
        }
    }

    /// Fixed TTL per purpose.
    pub fn ttl(&self) -> Duration {
        match self {
            TokenPurpose::Magic => Duration::days(30),
            TokenPurpose::Approve => Duration::days(7),
            TokenPurpose::Session => Duration::days(30),
        }
    }
}

/// Declaration order here IS the canonical field order on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    sub: String,
    purpose: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    /// Fails closed: no service without a secret of acceptable length.
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        config::validate_secret(secret)?;
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
        })
    }

    pub fn issue(&self, purpose: TokenPurpose, subject: &str) -> anyhow::Result<String> {
        self.issue_at(purpose, subject, Utc::now())
    }

    pub fn issue_at(
        &self,
        purpose: TokenPurpose,
        subject: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let subject = subject.trim().to_lowercase();
        if subject.is_empty() {
            anyhow::bail!("token subject must not be empty");
        }

        let payload = TokenPayload {
            sub: subject,
            purpose: purpose.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + purpose.ttl()).timestamp(),
        };
        let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?);
        let sig = URL_SAFE_NO_PAD.encode(self.sign(encoded.as_bytes())?);
        Ok(format!("{}.{}", encoded, sig))
    }

    /// Verify a token of the expected purpose. Returns the subject email,
    /// or `None` for every rejection (opaque by design).
    pub fn verify(&self, purpose: TokenPurpose, token: &str) -> Option<String> {
        self.verify_at(purpose, token, Utc::now())
    }

    pub fn verify_at(
        &self,
        purpose: TokenPurpose,
        token: &str,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let (encoded, provided_sig) = token.split_once('.')?;
        if encoded.is_empty() || provided_sig.is_empty() {
            return None;
        }

        // Signature first, constant-time, before touching the payload.
        let expected = self.sign(encoded.as_bytes()).ok()?;
        let provided = URL_SAFE_NO_PAD.decode(provided_sig).ok()?;
        if !bool::from(expected.ct_eq(&provided)) {
            return None;
        }

        let payload: TokenPayload =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(encoded).ok()?).ok()?;
        if payload.purpose != purpose.as_str() {
            return None;
        }
        if payload.exp <= now.timestamp() {
            return None;
        }
        Some(payload.sub)
    }

    fn sign(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| anyhow::anyhow!("hmac init failed: {}", e))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
