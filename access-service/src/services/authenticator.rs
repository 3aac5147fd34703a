use service_core::error::AppError;
use std::sync::Arc;

use super::sessions::SessionService;
use super::store::PrincipalStore;
use crate::models::{Principal, Session};

/// Principal resolved from a live session.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub principal: Principal,
    pub session: Session,
}

/// Maps an inbound session token to the principal behind it. Read-only:
/// a missing, unknown or expired token yields `None`, never an error.
#[derive(Clone)]
pub struct Authenticator {
    sessions: SessionService,
    principals: Arc<dyn PrincipalStore>,
}

impl Authenticator {
    pub fn new(sessions: SessionService, principals: Arc<dyn PrincipalStore>) -> Self {
        Self {
            sessions,
            principals,
        }
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Result<Option<Authenticated>, AppError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let Some(session) = self.sessions.find_by_token(token).await? else {
            tracing::debug!("Session token did not resolve");
            return Ok(None);
        };

        let principal = self
            .principals
            .find_principal_by_id(session.principal_id)
            .await?;

        Ok(principal.map(|principal| Authenticated { principal, session }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPrincipal;
    use crate::services::MemoryStore;
    use chrono::Duration;

    #[tokio::test]
    async fn resolves_live_session_to_principal() {
        let store = Arc::new(MemoryStore::new());
        let principal = store
            .insert_principal(&NewPrincipal::new("ada@example.com", None, None))
            .await
            .unwrap();
        let sessions = SessionService::new(store.clone(), Duration::hours(1));
        let authenticator = Authenticator::new(sessions.clone(), store.clone());

        let issued = sessions.create(principal.principal_id, None, None).await.unwrap();
        let resolved = authenticator
            .authenticate(Some(&issued.token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.principal.principal_id, principal.principal_id);
        assert_eq!(resolved.session.session_id, issued.session.session_id);
    }

    #[tokio::test]
    async fn missing_or_unknown_token_is_anonymous() {
        let store = Arc::new(MemoryStore::new());
        let sessions = SessionService::new(store.clone(), Duration::hours(1));
        let authenticator = Authenticator::new(sessions, store);

        assert!(authenticator.authenticate(None).await.unwrap().is_none());
        assert!(authenticator.authenticate(Some("")).await.unwrap().is_none());
        assert!(authenticator.authenticate(Some("deadbeef")).await.unwrap().is_none());
    }
}
