//! Session model - server-side records behind the session cookie.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Session entity. Only the SHA-256 of the opaque token is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub principal_id: i64,
    #[serde(skip_serializing)]
    pub token_hash_text: String,
    pub expiry_utc: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Session {
    /// Create a new session for `token`, valid for `ttl` from now.
    pub fn new(
        principal_id: i64,
        token: &str,
        ttl: Duration,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            principal_id,
            token_hash_text: Self::hash_token(token),
            expiry_utc: now + ttl,
            ip_address,
            user_agent,
            created_utc: now,
        }
    }

    /// Hash a token using SHA-256
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Expired sessions are those whose expiry lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc < now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
