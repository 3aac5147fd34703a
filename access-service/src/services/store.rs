//! Store contracts consumed by the access-control core.
//!
//! Uniqueness rules (principal email and external id, permission
//! resource+action, endpoint path+method, every grant pair) are enforced by
//! the store and surface as `AppError::Conflict`. References to missing rows
//! surface as `AppError::NotFound`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use service_core::pagination::PageRequest;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    Endpoint, NewPrincipal, Permission, Principal, PrincipalWithGrant, Role, RoleUpdate, Session,
    UserRole,
};

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn insert_principal(&self, principal: &NewPrincipal) -> Result<Principal, AppError>;

    async fn find_principal_by_id(&self, principal_id: i64) -> Result<Option<Principal>, AppError>;

    async fn find_principal_by_email(&self, email: &str) -> Result<Option<Principal>, AppError>;

    async fn find_principal_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Principal>, AppError>;

    /// Principals whose email or display name contains `search`
    /// (case-insensitive), newest first, each joined with its grant of the
    /// role named `admin_role_name`. Returns the page and the total match count.
    async fn search_principals(
        &self,
        search: Option<&str>,
        admin_role_name: &str,
        page: PageRequest,
    ) -> Result<(Vec<PrincipalWithGrant>, u64), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    // Roles

    async fn list_roles(&self) -> Result<Vec<Role>, AppError>;

    async fn find_role_by_id(&self, role_id: i64) -> Result<Option<Role>, AppError>;

    async fn find_role_by_name(&self, role_name: &str) -> Result<Option<Role>, AppError>;

    async fn insert_role(
        &self,
        role_name: &str,
        description: Option<&str>,
        preset: bool,
    ) -> Result<Role, AppError>;

    /// Returns `None` when the role does not exist.
    async fn update_role(&self, role_id: i64, update: &RoleUpdate) -> Result<Option<Role>, AppError>;

    /// Returns `false` when the role does not exist. Links and grants go with it.
    async fn delete_role(&self, role_id: i64) -> Result<bool, AppError>;

    // Permissions

    async fn list_permissions(&self) -> Result<Vec<Permission>, AppError>;

    async fn find_permission_by_id(
        &self,
        permission_id: i64,
    ) -> Result<Option<Permission>, AppError>;

    async fn find_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>, AppError>;

    async fn insert_permission(&self, resource: &str, action: &str)
        -> Result<Permission, AppError>;

    async fn delete_permission(&self, permission_id: i64) -> Result<bool, AppError>;

    // Endpoints

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, AppError>;

    async fn list_endpoints_by_method(&self, method: &str) -> Result<Vec<Endpoint>, AppError>;

    async fn find_endpoint_by_id(&self, endpoint_id: i64) -> Result<Option<Endpoint>, AppError>;

    async fn find_endpoint(
        &self,
        path_pattern: &str,
        method: &str,
    ) -> Result<Option<Endpoint>, AppError>;

    async fn insert_endpoint(&self, path_pattern: &str, method: &str)
        -> Result<Endpoint, AppError>;

    async fn delete_endpoint(&self, endpoint_id: i64) -> Result<bool, AppError>;

    // Role ↔ permission links

    async fn role_permission_ids(&self, role_id: i64) -> Result<Vec<i64>, AppError>;

    async fn add_role_permission(&self, role_id: i64, permission_id: i64) -> Result<(), AppError>;

    /// Drop `remove` and add `add` as one unit: an unknown id fails the
    /// whole change and leaves the links as they were. Links already
    /// present are skipped.
    async fn apply_role_permission_changes(
        &self,
        role_id: i64,
        add: &[i64],
        remove: &[i64],
    ) -> Result<(), AppError>;

    // Endpoint ↔ permission links

    async fn endpoint_permission_ids(&self, endpoint_id: i64) -> Result<Vec<i64>, AppError>;

    async fn add_endpoint_permission(
        &self,
        endpoint_id: i64,
        permission_id: i64,
    ) -> Result<(), AppError>;

    /// Endpoint counterpart of `apply_role_permission_changes`.
    async fn apply_endpoint_permission_changes(
        &self,
        endpoint_id: i64,
        add: &[i64],
        remove: &[i64],
    ) -> Result<(), AppError>;

    // Principal ↔ role grants

    async fn insert_user_role(&self, grant: &UserRole) -> Result<(), AppError>;

    async fn find_user_role(
        &self,
        principal_id: i64,
        role_id: i64,
    ) -> Result<Option<UserRole>, AppError>;

    async fn delete_user_role(&self, principal_id: i64, role_id: i64) -> Result<bool, AppError>;

    async fn list_user_roles(&self, principal_id: i64) -> Result<Vec<UserRole>, AppError>;

    /// Union of permission ids held by the principal through all of its roles.
    async fn principal_permission_ids(&self, principal_id: i64) -> Result<HashSet<i64>, AppError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), AppError>;

    async fn find_session_by_id(&self, session_id: Uuid) -> Result<Option<Session>, AppError>;

    async fn find_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, AppError>;

    /// All sessions of a principal, newest first.
    async fn find_sessions_by_principal(
        &self,
        principal_id: i64,
    ) -> Result<Vec<Session>, AppError>;

    async fn delete_session(&self, session_id: Uuid) -> Result<bool, AppError>;

    /// Remove sessions whose expiry is strictly before `now`.
    async fn delete_sessions_expired_before(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// The three store handles the services are built from.
#[derive(Clone)]
pub struct Stores {
    pub principals: Arc<dyn PrincipalStore>,
    pub registry: Arc<dyn RegistryStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    /// All three handles backed by one implementation.
    pub fn shared<T>(store: Arc<T>) -> Self
    where
        T: PrincipalStore + RegistryStore + SessionStore + 'static,
    {
        Self {
            principals: store.clone(),
            registry: store.clone(),
            sessions: store,
        }
    }
}

/// Build a `%term%` ILIKE pattern with LIKE metacharacters escaped.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
