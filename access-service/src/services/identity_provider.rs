//! Client for the external identity provider.
//!
//! The provider is the system of record for credentials. This service only
//! asks it to create, verify and delete accounts; it never sees password
//! hashes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::instrument;
use utoipa::ToSchema;

use super::error::ProviderError;
use crate::config::IdentityProviderConfig;

/// Session issued by the provider alongside an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Account as reported by the provider after sign-up or sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAccount {
    pub external_id: String,
    pub email: String,
    /// Present when the provider issues a session immediately.
    pub session: Option<ProviderSession>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        request_id: Option<&str>,
    ) -> Result<ProviderAccount, ProviderError>;

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
        request_id: Option<&str>,
    ) -> Result<ProviderAccount, ProviderError>;

    async fn delete_account(
        &self,
        external_id: &str,
        request_id: Option<&str>,
    ) -> Result<(), ProviderError>;
}

// ==================== HTTP Provider ====================

#[derive(Debug, Deserialize)]
struct UserBody {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Sign-up returns a bare user when confirmation is pending, or a session
/// wrapping the user when accounts are usable immediately.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AuthBody {
    WithSession {
        #[serde(flatten)]
        session: ProviderSession,
        user: UserBody,
    },
    UserOnly(UserBody),
}

impl AuthBody {
    fn into_account(self, fallback_email: &str) -> ProviderAccount {
        let (user, session) = match self {
            AuthBody::WithSession { session, user } => (user, Some(session)),
            AuthBody::UserOnly(user) => (user, None),
        };
        ProviderAccount {
            external_id: user.id,
            email: user.email.unwrap_or_else(|| fallback_email.to_string()),
            session,
        }
    }
}

#[derive(Serialize)]
struct CredentialsBody<'a> {
    email: &'a str,
    password: &'a str,
}

/// GoTrue-compatible REST client.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    service_key: String,
}

impl HttpIdentityProvider {
    pub fn new(config: &IdentityProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        tracing::info!(url = %config.url, "Identity provider client configured");

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            service_key: config.service_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    async fn rejection(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ProviderError::Rejected {
            status,
            message: error_message(&body),
        }
    }
}

/// Pull a human-readable message out of a provider error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<HashMap<String, serde_json::Value>>(body)
        .ok()
        .and_then(|fields| {
            ["msg", "message", "error_description", "error"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn is_already_registered(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already registered") || lower.contains("already exists")
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip(self, password, request_id))]
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        request_id: Option<&str>,
    ) -> Result<ProviderAccount, ProviderError> {
        let response = self
            .client
            .traced_post(&self.url("signup"))
            .header("apikey", &self.anon_key)
            .json(&CredentialsBody { email, password })
            .send_with_request_id(request_id)
            .await?;

        if !response.status().is_success() {
            return Err(match Self::rejection(response).await {
                ProviderError::Rejected { status, message }
                    if matches!(status, 400 | 422) && is_already_registered(&message) =>
                {
                    ProviderError::EmailAlreadyRegistered
                }
                other => other,
            });
        }

        let body: AuthBody = response.json().await?;
        Ok(body.into_account(email))
    }

    #[instrument(skip(self, password, request_id))]
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
        request_id: Option<&str>,
    ) -> Result<ProviderAccount, ProviderError> {
        let response = self
            .client
            .traced_post(&self.url("token?grant_type=password"))
            .header("apikey", &self.anon_key)
            .json(&CredentialsBody { email, password })
            .send_with_request_id(request_id)
            .await?;

        if !response.status().is_success() {
            return Err(match Self::rejection(response).await {
                ProviderError::Rejected { status, .. } if matches!(status, 400 | 401 | 422) => {
                    ProviderError::InvalidCredentials
                }
                other => other,
            });
        }

        let body: AuthBody = response.json().await?;
        Ok(body.into_account(email))
    }

    #[instrument(skip(self, request_id))]
    async fn delete_account(
        &self,
        external_id: &str,
        request_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        let response = self
            .client
            .traced_delete(&self.url(&format!("admin/users/{}", external_id)))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send_with_request_id(request_id)
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            404 => Err(ProviderError::AccountNotFound(external_id.to_string())),
            _ => Err(Self::rejection(response).await),
        }
    }
}

// ==================== Mock Provider ====================

struct MockAccount {
    external_id: String,
    password: String,
}

/// In-memory provider for tests and local development.
pub struct MockIdentityProvider {
    accounts: Mutex<HashMap<String, MockAccount>>,
    next_id: AtomicU64,
    fail_next_delete: AtomicBool,
    issue_sessions: bool,
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_next_delete: AtomicBool::new(false),
            issue_sessions: true,
        }
    }

    /// Provider configured to require email confirmation: sign-up returns
    /// no session.
    pub fn without_sessions() -> Self {
        Self {
            issue_sessions: false,
            ..Self::new()
        }
    }

    /// Make the next `delete_account` call fail with a transport error.
    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }

    pub fn has_account(&self, email: &str) -> bool {
        self.accounts
            .lock()
            .map(|accounts| accounts.contains_key(&email.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().map(|a| a.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MockAccount>>, ProviderError> {
        self.accounts
            .lock()
            .map_err(|e| ProviderError::Transport(format!("Mock provider mutex poisoned: {}", e)))
    }

    fn session(&self, external_id: &str) -> Option<ProviderSession> {
        self.issue_sessions.then(|| ProviderSession {
            access_token: format!("mock-access-{}", external_id),
            refresh_token: Some(format!("mock-refresh-{}", external_id)),
            token_type: Some("bearer".to_string()),
            expires_in: Some(3600),
        })
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _request_id: Option<&str>,
    ) -> Result<ProviderAccount, ProviderError> {
        let key = email.to_lowercase();
        let mut accounts = self.lock()?;
        if accounts.contains_key(&key) {
            return Err(ProviderError::EmailAlreadyRegistered);
        }

        let external_id = format!("mock-{:08}", self.next_id.fetch_add(1, Ordering::SeqCst));
        accounts.insert(
            key.clone(),
            MockAccount {
                external_id: external_id.clone(),
                password: password.to_string(),
            },
        );

        Ok(ProviderAccount {
            session: self.session(&external_id),
            external_id,
            email: key,
        })
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
        _request_id: Option<&str>,
    ) -> Result<ProviderAccount, ProviderError> {
        let key = email.to_lowercase();
        let accounts = self.lock()?;
        match accounts.get(&key) {
            Some(account) if account.password == password => Ok(ProviderAccount {
                external_id: account.external_id.clone(),
                session: self.session(&account.external_id),
                email: key,
            }),
            _ => Err(ProviderError::InvalidCredentials),
        }
    }

    async fn delete_account(
        &self,
        external_id: &str,
        _request_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::Transport(
                "provider unreachable during delete".to_string(),
            ));
        }

        let mut accounts = self.lock()?;
        let before = accounts.len();
        accounts.retain(|_, account| account.external_id != external_id);
        if accounts.len() == before {
            return Err(ProviderError::AccountNotFound(external_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signup_with_session() {
        let body = r#"{
            "access_token": "at",
            "refresh_token": "rt",
            "token_type": "bearer",
            "expires_in": 3600,
            "user": {"id": "u-1", "email": "ada@example.com"}
        }"#;
        let account = serde_json::from_str::<AuthBody>(body)
            .unwrap()
            .into_account("ignored@example.com");
        assert_eq!(account.external_id, "u-1");
        assert_eq!(account.email, "ada@example.com");
        assert_eq!(account.session.unwrap().access_token, "at");
    }

    #[test]
    fn parses_signup_pending_confirmation() {
        let body = r#"{"id": "u-2", "email": "grace@example.com", "confirmation_sent_at": "2024-01-01T00:00:00Z"}"#;
        let account = serde_json::from_str::<AuthBody>(body)
            .unwrap()
            .into_account("grace@example.com");
        assert_eq!(account.external_id, "u-2");
        assert!(account.session.is_none());
    }

    #[test]
    fn extracts_error_messages() {
        assert_eq!(
            error_message(r#"{"code":422,"msg":"User already registered"}"#),
            "User already registered"
        );
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
        assert!(is_already_registered("User already registered"));
    }

    #[tokio::test]
    async fn mock_rejects_duplicate_email_and_bad_password() {
        let provider = MockIdentityProvider::new();
        provider.sign_up("Ada@example.com", "pw-123456", None).await.unwrap();

        assert_eq!(
            provider.sign_up("ada@example.com", "other", None).await,
            Err(ProviderError::EmailAlreadyRegistered)
        );
        assert_eq!(
            provider.sign_in("ada@example.com", "wrong", None).await,
            Err(ProviderError::InvalidCredentials)
        );
        assert!(provider.sign_in("ada@example.com", "pw-123456", None).await.is_ok());
    }

    #[tokio::test]
    async fn mock_delete_failure_is_one_shot() {
        let provider = MockIdentityProvider::without_sessions();
        let account = provider.sign_up("a@example.com", "pw", None).await.unwrap();
        assert!(account.session.is_none());

        provider.fail_next_delete();
        assert!(matches!(
            provider.delete_account(&account.external_id, None).await,
            Err(ProviderError::Transport(_))
        ));
        assert!(provider.has_account("a@example.com"));

        provider.delete_account(&account.external_id, None).await.unwrap();
        assert_eq!(provider.account_count(), 0);
    }
}
