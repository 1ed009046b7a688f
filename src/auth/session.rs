//! Stateless dashboard session tokens.
//!
//! Wire format: `base64url(json(payload)) "." base64url(hmac_sha256(encoded))`.
//! Nothing is stored server-side; validity is recomputed on every check.

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub principal_id: String,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct SessionManager {
    secret: Arc<Zeroizing<Vec<u8>>>,
}

impl SessionManager {
    pub fn new(secret: &[u8]) -> anyhow::Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            anyhow::bail!(
                "session secret must be at least {} bytes (got {})",
                MIN_SECRET_LEN,
                secret.len()
            );
        }
        Ok(Self {
            secret: Arc::new(Zeroizing::new(secret.to_vec())),
        })
    }

    fn mac(&self) -> anyhow::Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| anyhow::anyhow!("invalid HMAC key: {}", e))
    }

    pub fn issue(&self, principal_id: &str) -> anyhow::Result<String> {
        self.issue_at(principal_id, Utc::now())
    }

    pub fn issue_at(&self, principal_id: &str, now: DateTime<Utc>) -> anyhow::Result<String> {
        if principal_id.is_empty() {
            anyhow::bail!("principal id must not be empty");
        }
        let payload = SessionPayload {
            principal_id: principal_id.to_string(),
            issued_at: now.timestamp(),
            expires_at: now.timestamp() + SESSION_TTL_SECS,
        };
        let encoded = B64.encode(serde_json::to_vec(&payload)?);

        let mut mac = self.mac()?;
        mac.update(encoded.as_bytes());
        let signature = B64.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", encoded, signature))
    }

    pub fn verify(&self, token: &str) -> Option<SessionPayload> {
        self.verify_at(token, Utc::now())
    }

    /// `None` on a bad shape, a signature mismatch, or an expired payload.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Option<SessionPayload> {
        let (encoded, signature) = token.split_once('.')?;
        let signature = B64.decode(signature).ok()?;

        let mut mac = self.mac().ok()?;
        mac.update(encoded.as_bytes());
        // constant-time comparison
        mac.verify_slice(&signature).ok()?;

        let payload: SessionPayload = serde_json::from_slice(&B64.decode(encoded).ok()?).ok()?;
        if payload.expires_at <= now.timestamp() {
            return None;
        }
        Some(payload)
    }
}
