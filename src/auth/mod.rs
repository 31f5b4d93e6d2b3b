//! Token authentication
//!
//! Issues and verifies time-limited bearer tokens binding a client id to an
//! expiry. A token is two URL-safe base64 segments, `claims.signature`,
//! where the signature is HMAC-SHA256 over the encoded claims. Verification
//! is stateless: a token is valid until its natural expiry, and there is no
//! revocation list.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Claims embedded in a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub client_id: String,
    pub expires_at_ms: u64,
}

/// Token verification failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("token malformed")]
    Malformed,
}

/// Issues and verifies signed bearer tokens with a shared secret.
#[derive(Clone)]
pub struct Authenticator {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Authenticator {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    /// Issue a token for `client_id` expiring `ttl` from now.
    pub fn issue(&self, client_id: &str) -> String {
        self.issue_at(client_id, now_ms())
    }

    fn issue_at(&self, client_id: &str, now_ms: u64) -> String {
        let claims = TokenClaims {
            client_id: client_id.to_string(),
            expires_at_ms: now_ms + self.ttl.as_millis() as u64,
        };
        let payload =
            serde_json::to_vec(&claims).expect("token claims serialize to JSON");
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let sig = self.sign(encoded.as_bytes());
        format!("{}.{}", encoded, URL_SAFE_NO_PAD.encode(sig))
    }

    /// Verify a token and return the embedded client id.
    ///
    /// Fails with [`AuthError::Expired`] once the expiry has passed and with
    /// [`AuthError::Malformed`] for any structural or signature failure.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        self.verify_at(token, now_ms())
    }

    fn verify_at(&self, token: &str, now_ms: u64) -> Result<String, AuthError> {
        let (encoded, sig_b64) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC-SHA256 accepts any key length");
        mac.update(encoded.as_bytes());
        mac.verify_slice(&sig).map_err(|_| AuthError::Malformed)?;

        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| AuthError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| AuthError::Malformed)?;

        if now_ms >= claims.expires_at_ms {
            return Err(AuthError::Expired);
        }
        Ok(claims.client_id)
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC-SHA256 accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}
