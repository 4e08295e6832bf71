/**
 * Token Service
 *
 * Issues and verifies the bearer tokens carried by STOMP CONNECT frames and
 * admin REST calls.
 *
 * Format: hex("<subject>:<role>:<expires_at_ms>") "." hex(HMAC-SHA256(secret, payload))
 */

use crate::types::{Principal, Role};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Stateless token issuer/verifier keyed by a shared secret.
#[derive(Clone)]
pub struct TokenService {
    keyed: HmacSha256,
}

impl TokenService {
    /// Build a service keyed by `secret`. An empty secret is rejected.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, AuthError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AuthError::InvalidSecret);
        }
        let keyed = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::InvalidSecret)?;
        Ok(Self { keyed })
    }

    /// Issue a token for `subject` valid for `ttl`.
    pub fn issue(&self, subject: &str, role: Role, ttl: Duration) -> String {
        let expires_at = chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        self.sign(subject, role, expires_at)
    }

    fn sign(&self, subject: &str, role: Role, expires_at: i64) -> String {
        let payload = format!("{}:{}:{}", subject, role, expires_at);
        let tag = self.mac(payload.as_bytes()).finalize().into_bytes();
        format!("{}.{}", hex::encode(payload), hex::encode(tag))
    }

    fn mac(&self, payload: &[u8]) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(payload);
        mac
    }

    /// Verify a token and recover its principal. Expired, malformed or forged
    /// tokens yield `None`.
    pub fn verify(&self, token: &str) -> Option<Principal> {
        let (payload_hex, tag_hex) = token.trim().split_once('.')?;
        let payload = hex::decode(payload_hex).ok()?;
        let tag = hex::decode(tag_hex).ok()?;

        if self.mac(&payload).verify_slice(&tag).is_err() {
            debug!("Rejected token with bad signature");
            return None;
        }

        let payload = String::from_utf8(payload).ok()?;
        let mut parts = payload.rsplitn(3, ':');
        let expires_at: i64 = parts.next()?.parse().ok()?;
        let role = Role::parse(parts.next()?)?;
        let subject = parts.next()?.to_string();

        if expires_at <= chrono::Utc::now().timestamp_millis() {
            debug!("Rejected expired token for {}", subject);
            return None;
        }

        Some(Principal {
            subject,
            role,
            expires_at,
        })
    }
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Admin role required")]
    Forbidden,

    #[error("Token secret must not be empty")]
    InvalidSecret,
}

impl axum::response::IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::UNAUTHORIZED;
        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
