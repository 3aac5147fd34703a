use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use super::store::SessionStore;
use crate::models::Session;

/// A freshly created session together with its opaque token. The token is
/// only available here; the store keeps its hash.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: Session,
    pub token: String,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a new session for `principal_id`. Existing sessions of the same
    /// principal stay valid.
    pub async fn create(
        &self,
        principal_id: i64,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedSession, AppError> {
        let token = generate_session_token();
        let session = Session::new(principal_id, &token, self.ttl, ip_address, user_agent);
        self.store.insert_session(&session).await?;

        tracing::info!(
            session_id = %session.session_id,
            principal_id,
            expires = %session.expiry_utc,
            "Session created"
        );

        Ok(IssuedSession { session, token })
    }

    pub async fn find_by_id(&self, session_id: Uuid) -> Result<Option<Session>, AppError> {
        self.store.find_session_by_id(session_id).await
    }

    /// Resolve a presented token to its session. Expired sessions resolve to
    /// nothing; they are left for the sweep.
    pub async fn find_by_token(&self, token: &str) -> Result<Option<Session>, AppError> {
        if token.is_empty() {
            return Ok(None);
        }

        let session = self
            .store
            .find_session_by_token_hash(&Session::hash_token(token))
            .await?;

        Ok(session.filter(|s| !s.is_expired()))
    }

    /// Live sessions of a principal, newest first.
    pub async fn find_by_principal(&self, principal_id: i64) -> Result<Vec<Session>, AppError> {
        let now = Utc::now();
        let sessions = self.store.find_sessions_by_principal(principal_id).await?;
        Ok(sessions.into_iter().filter(|s| !s.is_expired_at(now)).collect())
    }

    pub async fn delete(&self, session_id: Uuid) -> Result<bool, AppError> {
        let deleted = self.store.delete_session(session_id).await?;
        if deleted {
            tracing::info!(session_id = %session_id, "Session deleted");
        }
        Ok(deleted)
    }

    /// Remove every session that expired before `now`. Never invoked
    /// implicitly by other operations.
    pub async fn delete_expired_at(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let removed = self.store.delete_sessions_expired_before(now).await?;
        tracing::info!(removed, "Expired sessions swept");
        Ok(removed)
    }

    pub async fn delete_expired(&self) -> Result<u64, AppError> {
        self.delete_expired_at(Utc::now()).await
    }
}

fn generate_session_token() -> String {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; 32] = rng.gen();
    hex::encode(token_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPrincipal;
    use crate::services::{MemoryStore, PrincipalStore};

    async fn setup() -> (Arc<MemoryStore>, SessionService, i64) {
        let store = Arc::new(MemoryStore::new());
        let principal = store
            .insert_principal(&NewPrincipal::new("ada@example.com", None, None))
            .await
            .unwrap();
        let sessions = SessionService::new(store.clone(), Duration::hours(1));
        (store, sessions, principal.principal_id)
    }

    #[test]
    fn tokens_are_64_hex_chars_and_unique() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn token_resolves_to_session() {
        let (_, sessions, principal_id) = setup().await;
        let issued = sessions
            .create(principal_id, Some("10.0.0.1".to_string()), None)
            .await
            .unwrap();

        let found = sessions.find_by_token(&issued.token).await.unwrap().unwrap();
        assert_eq!(found.session_id, issued.session.session_id);
        assert_eq!(found.ip_address.as_deref(), Some("10.0.0.1"));
        assert!(sessions.find_by_token("not-a-token").await.unwrap().is_none());
        assert!(sessions.find_by_token("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_does_not_resolve() {
        let (store, sessions, principal_id) = setup().await;
        let mut session = Session::new(principal_id, "stale", Duration::hours(1), None, None);
        session.expiry_utc = Utc::now() - Duration::minutes(1);
        store.insert_session(&session).await.unwrap();

        assert!(sessions.find_by_token("stale").await.unwrap().is_none());
        assert!(sessions.find_by_principal(principal_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn principal_may_hold_several_sessions() {
        let (_, sessions, principal_id) = setup().await;
        let first = sessions.create(principal_id, None, None).await.unwrap();
        let second = sessions.create(principal_id, None, None).await.unwrap();

        let live = sessions.find_by_principal(principal_id).await.unwrap();
        assert_eq!(live.len(), 2);
        assert!(sessions.find_by_token(&first.token).await.unwrap().is_some());
        assert!(sessions.find_by_token(&second.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let (_, sessions, principal_id) = setup().await;
        let issued = sessions.create(principal_id, None, None).await.unwrap();

        assert!(sessions.delete(issued.session.session_id).await.unwrap());
        assert!(!sessions.delete(issued.session.session_id).await.unwrap());
        assert!(sessions
            .find_by_id(issued.session.session_id)
            .await
            .unwrap()
            .is_none());
    }
}
