//! In-process store used by tests and `STORE_BACKEND=memory`.
//!
//! Applies the same uniqueness and reference rules as the relational schema,
//! including cascading deletes of links and grants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use service_core::pagination::PageRequest;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{PrincipalStore, RegistryStore, SessionStore};
use crate::models::{
    Endpoint, EndpointPermission, NewPrincipal, Permission, Principal, PrincipalWithGrant, Role,
    RolePermission, RoleUpdate, Session, UserRole,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    principals: BTreeMap<i64, Principal>,
    roles: BTreeMap<i64, Role>,
    permissions: BTreeMap<i64, Permission>,
    endpoints: BTreeMap<i64, Endpoint>,
    role_permissions: HashSet<RolePermission>,
    endpoint_permissions: HashSet<EndpointPermission>,
    user_roles: HashMap<(i64, i64), UserRole>,
    sessions: HashMap<Uuid, Session>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }
}

fn conflict(entity: &str) -> AppError {
    AppError::Conflict(anyhow::anyhow!("{} already exists", entity))
}

fn missing_reference(entity: &str) -> AppError {
    AppError::NotFound(anyhow::anyhow!(
        "{} references a record that does not exist",
        entity
    ))
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn insert_principal(&self, principal: &NewPrincipal) -> Result<Principal, AppError> {
        let mut tables = self.lock()?;

        let duplicate = tables.principals.values().any(|p| {
            p.email.eq_ignore_ascii_case(&principal.email)
                || (principal.external_id.is_some() && p.external_id == principal.external_id)
        });
        if duplicate {
            return Err(conflict("Principal"));
        }

        let now = Utc::now();
        let row = Principal {
            principal_id: tables.next_id(),
            email: principal.email.clone(),
            display_name: principal.display_name.clone(),
            external_id: principal.external_id.clone(),
            created_utc: now,
            updated_utc: now,
        };
        tables.principals.insert(row.principal_id, row.clone());
        Ok(row)
    }

    async fn find_principal_by_id(&self, principal_id: i64) -> Result<Option<Principal>, AppError> {
        Ok(self.lock()?.principals.get(&principal_id).cloned())
    }

    async fn find_principal_by_email(&self, email: &str) -> Result<Option<Principal>, AppError> {
        Ok(self
            .lock()?
            .principals
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_principal_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Principal>, AppError> {
        Ok(self
            .lock()?
            .principals
            .values()
            .find(|p| p.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn search_principals(
        &self,
        search: Option<&str>,
        admin_role_name: &str,
        page: PageRequest,
    ) -> Result<(Vec<PrincipalWithGrant>, u64), AppError> {
        let tables = self.lock()?;
        let needle = search.map(str::to_lowercase);
        let admin_role_id = tables
            .roles
            .values()
            .find(|r| r.role_name == admin_role_name)
            .map(|r| r.role_id);

        let mut matched: Vec<&Principal> = tables
            .principals
            .values()
            .filter(|p| match &needle {
                Some(n) => {
                    contains_ci(&p.email, n)
                        || p.display_name.as_deref().is_some_and(|d| contains_ci(d, n))
                }
                None => true,
            })
            .collect();
        matched.sort_by(|a, b| {
            b.created_utc
                .cmp(&a.created_utc)
                .then_with(|| b.principal_id.cmp(&a.principal_id))
        });

        let total = matched.len() as u64;
        let rows = matched
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .map(|p| {
                let grant = admin_role_id
                    .and_then(|role_id| tables.user_roles.get(&(p.principal_id, role_id)));
                PrincipalWithGrant {
                    principal_id: p.principal_id,
                    email: p.email.clone(),
                    display_name: p.display_name.clone(),
                    created_utc: p.created_utc,
                    is_admin: grant.is_some(),
                    admin_granted_by: grant.map(|g| g.granted_by),
                    admin_granted_utc: grant.map(|g| g.granted_utc),
                }
            })
            .collect();

        Ok((rows, total))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    // ==================== Role Operations ====================

    async fn list_roles(&self) -> Result<Vec<Role>, AppError> {
        let mut roles: Vec<Role> = self.lock()?.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.role_name.cmp(&b.role_name));
        Ok(roles)
    }

    async fn find_role_by_id(&self, role_id: i64) -> Result<Option<Role>, AppError> {
        Ok(self.lock()?.roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&self, role_name: &str) -> Result<Option<Role>, AppError> {
        Ok(self
            .lock()?
            .roles
            .values()
            .find(|r| r.role_name == role_name)
            .cloned())
    }

    async fn insert_role(
        &self,
        role_name: &str,
        description: Option<&str>,
        preset: bool,
    ) -> Result<Role, AppError> {
        let mut tables = self.lock()?;
        if tables.roles.values().any(|r| r.role_name == role_name) {
            return Err(conflict("Role"));
        }

        let row = Role {
            role_id: tables.next_id(),
            role_name: role_name.to_string(),
            description: description.map(str::to_string),
            preset_flag: preset,
            created_utc: Utc::now(),
        };
        tables.roles.insert(row.role_id, row.clone());
        Ok(row)
    }

    async fn update_role(&self, role_id: i64, update: &RoleUpdate) -> Result<Option<Role>, AppError> {
        let mut tables = self.lock()?;

        if let Some(name) = &update.role_name {
            if tables
                .roles
                .values()
                .any(|r| r.role_id != role_id && &r.role_name == name)
            {
                return Err(conflict("Role"));
            }
        }

        let Some(role) = tables.roles.get_mut(&role_id) else {
            return Ok(None);
        };
        if let Some(name) = &update.role_name {
            role.role_name = name.clone();
        }
        if let Some(description) = &update.description {
            role.description = Some(description.clone());
        }
        Ok(Some(role.clone()))
    }

    async fn delete_role(&self, role_id: i64) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        if tables.roles.remove(&role_id).is_none() {
            return Ok(false);
        }
        tables.role_permissions.retain(|link| link.role_id != role_id);
        tables.user_roles.retain(|(_, rid), _| *rid != role_id);
        Ok(true)
    }

    // ==================== Permission Operations ====================

    async fn list_permissions(&self) -> Result<Vec<Permission>, AppError> {
        let mut permissions: Vec<Permission> =
            self.lock()?.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| (&a.resource, &a.action).cmp(&(&b.resource, &b.action)));
        Ok(permissions)
    }

    async fn find_permission_by_id(
        &self,
        permission_id: i64,
    ) -> Result<Option<Permission>, AppError> {
        Ok(self.lock()?.permissions.get(&permission_id).cloned())
    }

    async fn find_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>, AppError> {
        Ok(self
            .lock()?
            .permissions
            .values()
            .find(|p| p.resource == resource && p.action == action)
            .cloned())
    }

    async fn insert_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Permission, AppError> {
        let mut tables = self.lock()?;
        if tables
            .permissions
            .values()
            .any(|p| p.resource == resource && p.action == action)
        {
            return Err(conflict("Permission"));
        }

        let row = Permission {
            permission_id: tables.next_id(),
            resource: resource.to_string(),
            action: action.to_string(),
            created_utc: Utc::now(),
        };
        tables.permissions.insert(row.permission_id, row.clone());
        Ok(row)
    }

    async fn delete_permission(&self, permission_id: i64) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        if tables.permissions.remove(&permission_id).is_none() {
            return Ok(false);
        }
        tables
            .role_permissions
            .retain(|link| link.permission_id != permission_id);
        tables
            .endpoint_permissions
            .retain(|link| link.permission_id != permission_id);
        Ok(true)
    }

    // ==================== Endpoint Operations ====================

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, AppError> {
        let mut endpoints: Vec<Endpoint> = self.lock()?.endpoints.values().cloned().collect();
        endpoints.sort_by(|a, b| (&a.path_pattern, &a.method).cmp(&(&b.path_pattern, &b.method)));
        Ok(endpoints)
    }

    async fn list_endpoints_by_method(&self, method: &str) -> Result<Vec<Endpoint>, AppError> {
        Ok(self
            .lock()?
            .endpoints
            .values()
            .filter(|e| e.method == method)
            .cloned()
            .collect())
    }

    async fn find_endpoint_by_id(&self, endpoint_id: i64) -> Result<Option<Endpoint>, AppError> {
        Ok(self.lock()?.endpoints.get(&endpoint_id).cloned())
    }

    async fn find_endpoint(
        &self,
        path_pattern: &str,
        method: &str,
    ) -> Result<Option<Endpoint>, AppError> {
        Ok(self
            .lock()?
            .endpoints
            .values()
            .find(|e| e.path_pattern == path_pattern && e.method == method)
            .cloned())
    }

    async fn insert_endpoint(
        &self,
        path_pattern: &str,
        method: &str,
    ) -> Result<Endpoint, AppError> {
        let mut tables = self.lock()?;
        if tables
            .endpoints
            .values()
            .any(|e| e.path_pattern == path_pattern && e.method == method)
        {
            return Err(conflict("Endpoint"));
        }

        let row = Endpoint {
            endpoint_id: tables.next_id(),
            path_pattern: path_pattern.to_string(),
            method: method.to_string(),
            created_utc: Utc::now(),
        };
        tables.endpoints.insert(row.endpoint_id, row.clone());
        Ok(row)
    }

    async fn delete_endpoint(&self, endpoint_id: i64) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        if tables.endpoints.remove(&endpoint_id).is_none() {
            return Ok(false);
        }
        tables
            .endpoint_permissions
            .retain(|link| link.endpoint_id != endpoint_id);
        Ok(true)
    }

    // ==================== Role Permission Operations ====================

    async fn role_permission_ids(&self, role_id: i64) -> Result<Vec<i64>, AppError> {
        let mut ids: Vec<i64> = self
            .lock()?
            .role_permissions
            .iter()
            .filter(|link| link.role_id == role_id)
            .map(|link| link.permission_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn add_role_permission(&self, role_id: i64, permission_id: i64) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if !tables.roles.contains_key(&role_id) || !tables.permissions.contains_key(&permission_id)
        {
            return Err(missing_reference("Role permission"));
        }
        if !tables.role_permissions.insert(RolePermission {
            role_id,
            permission_id,
        }) {
            return Err(conflict("Role permission"));
        }
        Ok(())
    }

    async fn apply_role_permission_changes(
        &self,
        role_id: i64,
        add: &[i64],
        remove: &[i64],
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if !tables.roles.contains_key(&role_id)
            || add.iter().any(|id| !tables.permissions.contains_key(id))
        {
            return Err(missing_reference("Role permission"));
        }
        for &permission_id in remove {
            tables.role_permissions.remove(&RolePermission {
                role_id,
                permission_id,
            });
        }
        for &permission_id in add {
            tables.role_permissions.insert(RolePermission {
                role_id,
                permission_id,
            });
        }
        Ok(())
    }

    // ==================== Endpoint Permission Operations ====================

    async fn endpoint_permission_ids(&self, endpoint_id: i64) -> Result<Vec<i64>, AppError> {
        let mut ids: Vec<i64> = self
            .lock()?
            .endpoint_permissions
            .iter()
            .filter(|link| link.endpoint_id == endpoint_id)
            .map(|link| link.permission_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn add_endpoint_permission(
        &self,
        endpoint_id: i64,
        permission_id: i64,
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if !tables.endpoints.contains_key(&endpoint_id)
            || !tables.permissions.contains_key(&permission_id)
        {
            return Err(missing_reference("Endpoint permission"));
        }
        if !tables.endpoint_permissions.insert(EndpointPermission {
            endpoint_id,
            permission_id,
        }) {
            return Err(conflict("Endpoint permission"));
        }
        Ok(())
    }

    async fn apply_endpoint_permission_changes(
        &self,
        endpoint_id: i64,
        add: &[i64],
        remove: &[i64],
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if !tables.endpoints.contains_key(&endpoint_id)
            || add.iter().any(|id| !tables.permissions.contains_key(id))
        {
            return Err(missing_reference("Endpoint permission"));
        }
        for &permission_id in remove {
            tables.endpoint_permissions.remove(&EndpointPermission {
                endpoint_id,
                permission_id,
            });
        }
        for &permission_id in add {
            tables.endpoint_permissions.insert(EndpointPermission {
                endpoint_id,
                permission_id,
            });
        }
        Ok(())
    }

    // ==================== User Role Operations ====================

    async fn insert_user_role(&self, grant: &UserRole) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if !tables.principals.contains_key(&grant.principal_id)
            || !tables.principals.contains_key(&grant.granted_by)
            || !tables.roles.contains_key(&grant.role_id)
        {
            return Err(missing_reference("Role grant"));
        }

        let key = (grant.principal_id, grant.role_id);
        if tables.user_roles.contains_key(&key) {
            return Err(conflict("Role grant"));
        }
        tables.user_roles.insert(key, grant.clone());
        Ok(())
    }

    async fn find_user_role(
        &self,
        principal_id: i64,
        role_id: i64,
    ) -> Result<Option<UserRole>, AppError> {
        Ok(self.lock()?.user_roles.get(&(principal_id, role_id)).cloned())
    }

    async fn delete_user_role(&self, principal_id: i64, role_id: i64) -> Result<bool, AppError> {
        Ok(self
            .lock()?
            .user_roles
            .remove(&(principal_id, role_id))
            .is_some())
    }

    async fn list_user_roles(&self, principal_id: i64) -> Result<Vec<UserRole>, AppError> {
        let mut grants: Vec<UserRole> = self
            .lock()?
            .user_roles
            .values()
            .filter(|g| g.principal_id == principal_id)
            .cloned()
            .collect();
        grants.sort_by(|a, b| {
            a.granted_utc
                .cmp(&b.granted_utc)
                .then_with(|| a.role_id.cmp(&b.role_id))
        });
        Ok(grants)
    }

    async fn principal_permission_ids(&self, principal_id: i64) -> Result<HashSet<i64>, AppError> {
        let tables = self.lock()?;
        let role_ids: HashSet<i64> = tables
            .user_roles
            .keys()
            .filter(|(pid, _)| *pid == principal_id)
            .map(|(_, rid)| *rid)
            .collect();

        Ok(tables
            .role_permissions
            .iter()
            .filter(|link| role_ids.contains(&link.role_id))
            .map(|link| link.permission_id)
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if !tables.principals.contains_key(&session.principal_id) {
            return Err(missing_reference("Session"));
        }
        if tables.sessions.contains_key(&session.session_id)
            || tables
                .sessions
                .values()
                .any(|s| s.token_hash_text == session.token_hash_text)
        {
            return Err(conflict("Session"));
        }
        tables.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn find_session_by_id(&self, session_id: Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.lock()?.sessions.get(&session_id).cloned())
    }

    async fn find_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, AppError> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .find(|s| s.token_hash_text == token_hash)
            .cloned())
    }

    async fn find_sessions_by_principal(
        &self,
        principal_id: i64,
    ) -> Result<Vec<Session>, AppError> {
        let mut sessions: Vec<Session> = self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.principal_id == principal_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(sessions)
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool, AppError> {
        Ok(self.lock()?.sessions.remove(&session_id).is_some())
    }

    async fn delete_sessions_expired_before(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tables = self.lock()?;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn principal(store: &MemoryStore, email: &str) -> Principal {
        store
            .insert_principal(&NewPrincipal::new(email, None, Some(format!("ext-{}", email))))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let store = MemoryStore::new();
        principal(&store, "ada@example.com").await;

        let err = store
            .insert_principal(&NewPrincipal::new("ADA@example.com", None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_grant_is_conflict() {
        let store = MemoryStore::new();
        let a = principal(&store, "a@example.com").await;
        let b = principal(&store, "b@example.com").await;
        let role = store.insert_role("admin", None, true).await.unwrap();

        let grant = UserRole {
            principal_id: a.principal_id,
            role_id: role.role_id,
            granted_by: b.principal_id,
            granted_utc: Utc::now(),
        };
        store.insert_user_role(&grant).await.unwrap();
        let err = store.insert_user_role(&grant).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn grant_to_missing_principal_is_not_found() {
        let store = MemoryStore::new();
        let b = principal(&store, "b@example.com").await;
        let role = store.insert_role("admin", None, true).await.unwrap();

        let err = store
            .insert_user_role(&UserRole {
                principal_id: 9_999,
                role_id: role.role_id,
                granted_by: b.principal_id,
                granted_utc: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.list_user_roles(9_999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_role_cascades_links_and_grants() {
        let store = MemoryStore::new();
        let a = principal(&store, "a@example.com").await;
        let role = store.insert_role("editor", None, false).await.unwrap();
        let perm = store.insert_permission("articles", "write").await.unwrap();
        store
            .add_role_permission(role.role_id, perm.permission_id)
            .await
            .unwrap();
        store
            .insert_user_role(&UserRole {
                principal_id: a.principal_id,
                role_id: role.role_id,
                granted_by: a.principal_id,
                granted_utc: Utc::now(),
            })
            .await
            .unwrap();

        assert!(store.delete_role(role.role_id).await.unwrap());
        assert!(store.role_permission_ids(role.role_id).await.unwrap().is_empty());
        assert!(store
            .principal_permission_ids(a.principal_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn permission_changes_with_unknown_id_leave_links_untouched() {
        let store = MemoryStore::new();
        let role = store.insert_role("author", None, false).await.unwrap();
        let publish = store.insert_permission("articles", "publish").await.unwrap();
        let draft = store.insert_permission("articles", "draft").await.unwrap();
        store
            .apply_role_permission_changes(role.role_id, &[publish.permission_id], &[])
            .await
            .unwrap();

        let err = store
            .apply_role_permission_changes(
                role.role_id,
                &[draft.permission_id, 9_999],
                &[publish.permission_id],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(
            store.role_permission_ids(role.role_id).await.unwrap(),
            vec![publish.permission_id]
        );
    }

    #[tokio::test]
    async fn sweep_removes_only_sessions_expired_before_now() {
        let store = MemoryStore::new();
        let a = principal(&store, "a@example.com").await;
        let now = Utc::now();

        let mut expired = Session::new(a.principal_id, "t1", Duration::hours(1), None, None);
        expired.expiry_utc = now - Duration::seconds(1);
        let mut boundary = Session::new(a.principal_id, "t2", Duration::hours(1), None, None);
        boundary.expiry_utc = now;
        let live = Session::new(a.principal_id, "t3", Duration::hours(1), None, None);

        for s in [&expired, &boundary, &live] {
            store.insert_session(s).await.unwrap();
        }

        assert_eq!(store.delete_sessions_expired_before(now).await.unwrap(), 1);
        assert!(store.find_session_by_id(expired.session_id).await.unwrap().is_none());
        assert!(store.find_session_by_id(boundary.session_id).await.unwrap().is_some());
        assert!(store.find_session_by_id(live.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn search_matches_email_or_display_name() {
        let store = MemoryStore::new();
        store
            .insert_principal(&NewPrincipal::new(
                "grace@example.com",
                Some("Grace Hopper".to_string()),
                None,
            ))
            .await
            .unwrap();
        principal(&store, "alan@example.com").await;

        let (rows, total) = store
            .search_principals(Some("hopper"), "admin", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].email, "grace@example.com");
        assert!(!rows[0].is_admin);
    }
}
