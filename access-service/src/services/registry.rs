//! Administration of roles, permissions, endpoints and the grants linking
//! them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::error::AppError;
use service_core::pagination::{PageRequest, Paginated};
use std::collections::BTreeSet;
use std::sync::Arc;
use utoipa::ToSchema;

use super::store::{PrincipalStore, RegistryStore};
use crate::models::endpoint::normalize_method;
use crate::models::{Endpoint, Permission, PrincipalWithGrant, Role, RoleUpdate, UserRole};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoleDetail {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EndpointDetail {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub permissions: Vec<Permission>,
}

/// A role held by a principal, with the grant's audit fields.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PrincipalRole {
    pub role_id: i64,
    pub role_name: String,
    pub preset_flag: bool,
    pub granted_by: i64,
    pub granted_utc: DateTime<Utc>,
}

/// Links to add and links to remove to turn `current` into `desired`.
/// Both lists are sorted and free of duplicates.
pub fn reconcile(current: &[i64], desired: &[i64]) -> (Vec<i64>, Vec<i64>) {
    let current: BTreeSet<i64> = current.iter().copied().collect();
    let desired: BTreeSet<i64> = desired.iter().copied().collect();

    let add = desired.difference(&current).copied().collect();
    let remove = current.difference(&desired).copied().collect();
    (add, remove)
}

/// A principal may not change its own role grants through a request.
pub fn ensure_not_self(target_principal_id: i64, acting_principal_id: i64) -> Result<(), AppError> {
    if target_principal_id == acting_principal_id {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Principals cannot modify their own role grants"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct RegistryService {
    registry: Arc<dyn RegistryStore>,
    principals: Arc<dyn PrincipalStore>,
    admin_role_name: String,
}

impl RegistryService {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        principals: Arc<dyn PrincipalStore>,
        admin_role_name: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            principals,
            admin_role_name: admin_role_name.into(),
        }
    }

    pub fn admin_role_name(&self) -> &str {
        &self.admin_role_name
    }

    // ==================== Permissions ====================

    pub async fn list_permissions(&self) -> Result<Vec<Permission>, AppError> {
        self.registry.list_permissions().await
    }

    pub async fn create_permission(&self, resource: &str, action: &str) -> Result<Permission, AppError> {
        let permission = self
            .registry
            .insert_permission(resource.trim(), action.trim())
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::Conflict(anyhow::anyhow!(
                    "Permission {}:{} already exists",
                    resource,
                    action
                )),
                other => other,
            })?;

        tracing::info!(
            permission_id = permission.permission_id,
            permission = %permission.key(),
            "Permission created"
        );
        Ok(permission)
    }

    pub async fn delete_permission(&self, permission_id: i64) -> Result<(), AppError> {
        if !self.registry.delete_permission(permission_id).await? {
            return Err(AppError::NotFound(anyhow::anyhow!("Permission not found")));
        }
        tracing::info!(permission_id, "Permission deleted");
        Ok(())
    }

    async fn permissions_by_ids(&self, ids: &[i64]) -> Result<Vec<Permission>, AppError> {
        let mut permissions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(permission) = self.registry.find_permission_by_id(*id).await? {
                permissions.push(permission);
            }
        }
        Ok(permissions)
    }

    /// Fail with not-found unless every id names an existing permission.
    async fn ensure_permissions_exist(&self, ids: &[i64]) -> Result<(), AppError> {
        for id in ids {
            if self.registry.find_permission_by_id(*id).await?.is_none() {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Permission {} not found",
                    id
                )));
            }
        }
        Ok(())
    }

    // ==================== Roles ====================

    pub async fn list_roles(&self) -> Result<Vec<Role>, AppError> {
        self.registry.list_roles().await
    }

    async fn require_role(&self, role_id: i64) -> Result<Role, AppError> {
        self.registry
            .find_role_by_id(role_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Role not found")))
    }

    pub async fn get_role(&self, role_id: i64) -> Result<RoleDetail, AppError> {
        let role = self.require_role(role_id).await?;
        let ids = self.registry.role_permission_ids(role_id).await?;
        let permissions = self.permissions_by_ids(&ids).await?;
        Ok(RoleDetail { role, permissions })
    }

    pub async fn create_role(&self, role_name: &str, description: Option<&str>) -> Result<Role, AppError> {
        let role = self
            .registry
            .insert_role(role_name.trim(), description, false)
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => {
                    AppError::Conflict(anyhow::anyhow!("Role {} already exists", role_name))
                }
                other => other,
            })?;

        tracing::info!(role_id = role.role_id, role_name = %role.role_name, "Role created");
        Ok(role)
    }

    pub async fn update_role(&self, role_id: i64, update: RoleUpdate) -> Result<Role, AppError> {
        let role = self
            .registry
            .update_role(role_id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Role not found")))?;

        if role.preset_flag {
            tracing::warn!(role_id, role_name = %role.role_name, "Preset role modified");
        }
        tracing::info!(role_id, "Role updated");
        Ok(role)
    }

    pub async fn delete_role(&self, role_id: i64) -> Result<(), AppError> {
        let role = self.require_role(role_id).await?;
        if role.preset_flag {
            tracing::warn!(role_id, role_name = %role.role_name, "Preset role deleted");
        }
        if !self.registry.delete_role(role_id).await? {
            return Err(AppError::NotFound(anyhow::anyhow!("Role not found")));
        }
        tracing::info!(role_id, "Role deleted");
        Ok(())
    }

    /// Make the role hold exactly `permission_ids`.
    pub async fn set_role_permissions(
        &self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> Result<RoleDetail, AppError> {
        self.require_role(role_id).await?;
        self.ensure_permissions_exist(permission_ids).await?;

        let current = self.registry.role_permission_ids(role_id).await?;
        let (add, remove) = reconcile(&current, permission_ids);

        self.registry
            .apply_role_permission_changes(role_id, &add, &remove)
            .await?;

        tracing::info!(
            role_id,
            added = add.len(),
            removed = remove.len(),
            "Role permissions reconciled"
        );
        self.get_role(role_id).await
    }

    // ==================== Endpoints ====================

    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>, AppError> {
        self.registry.list_endpoints().await
    }

    async fn require_endpoint(&self, endpoint_id: i64) -> Result<Endpoint, AppError> {
        self.registry
            .find_endpoint_by_id(endpoint_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Endpoint not found")))
    }

    pub async fn get_endpoint(&self, endpoint_id: i64) -> Result<EndpointDetail, AppError> {
        let endpoint = self.require_endpoint(endpoint_id).await?;
        let ids = self.registry.endpoint_permission_ids(endpoint_id).await?;
        let permissions = self.permissions_by_ids(&ids).await?;
        Ok(EndpointDetail {
            endpoint,
            permissions,
        })
    }

    pub async fn create_endpoint(&self, path_pattern: &str, method: &str) -> Result<Endpoint, AppError> {
        let method = normalize_method(method);
        let endpoint = self
            .registry
            .insert_endpoint(path_pattern.trim(), &method)
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::Conflict(anyhow::anyhow!(
                    "Endpoint {} {} already exists",
                    method,
                    path_pattern
                )),
                other => other,
            })?;

        tracing::info!(
            endpoint_id = endpoint.endpoint_id,
            method = %endpoint.method,
            pattern = %endpoint.path_pattern,
            "Endpoint created"
        );
        Ok(endpoint)
    }

    pub async fn delete_endpoint(&self, endpoint_id: i64) -> Result<(), AppError> {
        if !self.registry.delete_endpoint(endpoint_id).await? {
            return Err(AppError::NotFound(anyhow::anyhow!("Endpoint not found")));
        }
        tracing::info!(endpoint_id, "Endpoint deleted");
        Ok(())
    }

    /// Make the endpoint require exactly `permission_ids`.
    pub async fn set_endpoint_permissions(
        &self,
        endpoint_id: i64,
        permission_ids: &[i64],
    ) -> Result<EndpointDetail, AppError> {
        self.require_endpoint(endpoint_id).await?;
        self.ensure_permissions_exist(permission_ids).await?;

        let current = self.registry.endpoint_permission_ids(endpoint_id).await?;
        let (add, remove) = reconcile(&current, permission_ids);

        self.registry
            .apply_endpoint_permission_changes(endpoint_id, &add, &remove)
            .await?;

        tracing::info!(
            endpoint_id,
            added = add.len(),
            removed = remove.len(),
            "Endpoint permissions reconciled"
        );
        self.get_endpoint(endpoint_id).await
    }

    // ==================== Principal grants ====================

    /// Grant `role_id` to `target_principal_id` on behalf of
    /// `granting_principal_id`, returning the persisted grant.
    pub async fn grant_role(
        &self,
        target_principal_id: i64,
        granting_principal_id: i64,
        role_id: i64,
    ) -> Result<UserRole, AppError> {
        ensure_not_self(target_principal_id, granting_principal_id)?;

        if self
            .principals
            .find_principal_by_id(target_principal_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(anyhow::anyhow!("Principal not found")));
        }
        let role = self.require_role(role_id).await?;

        let grant = UserRole {
            principal_id: target_principal_id,
            role_id,
            granted_by: granting_principal_id,
            granted_utc: Utc::now(),
        };

        self.registry
            .insert_user_role(&grant)
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::Conflict(anyhow::anyhow!(
                    "Principal already holds role {}",
                    role.role_name
                )),
                other => other,
            })?;

        tracing::info!(
            target_principal_id,
            granting_principal_id,
            role_id,
            role_name = %role.role_name,
            "Role granted"
        );
        Ok(grant)
    }

    pub async fn revoke_role(
        &self,
        target_principal_id: i64,
        revoking_principal_id: i64,
        role_id: i64,
    ) -> Result<(), AppError> {
        ensure_not_self(target_principal_id, revoking_principal_id)?;

        if !self
            .registry
            .delete_user_role(target_principal_id, role_id)
            .await?
        {
            return Err(AppError::NotFound(anyhow::anyhow!("Role grant not found")));
        }

        tracing::info!(
            target_principal_id,
            revoking_principal_id,
            role_id,
            "Role revoked"
        );
        Ok(())
    }

    pub async fn list_principal_roles(&self, principal_id: i64) -> Result<Vec<PrincipalRole>, AppError> {
        if self
            .principals
            .find_principal_by_id(principal_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(anyhow::anyhow!("Principal not found")));
        }

        let grants = self.registry.list_user_roles(principal_id).await?;
        let mut roles = Vec::with_capacity(grants.len());
        for grant in grants {
            if let Some(role) = self.registry.find_role_by_id(grant.role_id).await? {
                roles.push(PrincipalRole {
                    role_id: role.role_id,
                    role_name: role.role_name,
                    preset_flag: role.preset_flag,
                    granted_by: grant.granted_by,
                    granted_utc: grant.granted_utc,
                });
            }
        }
        Ok(roles)
    }

    /// Principals matching `search`, each with its administrative grant.
    pub async fn list_principals(
        &self,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Paginated<PrincipalWithGrant>, AppError> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let (rows, total) = self
            .principals
            .search_principals(search, &self.admin_role_name, page)
            .await?;
        Ok(Paginated::new(rows, page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPrincipal;
    use crate::services::MemoryStore;
    use axum::http::StatusCode;

    async fn setup() -> (Arc<MemoryStore>, RegistryService) {
        let store = Arc::new(MemoryStore::new());
        let service = RegistryService::new(store.clone(), store.clone(), "admin");
        (store, service)
    }

    async fn principal(store: &MemoryStore, email: &str) -> i64 {
        store
            .insert_principal(&NewPrincipal::new(email, None, None))
            .await
            .unwrap()
            .principal_id
    }

    #[test]
    fn reconcile_computes_additions_and_removals() {
        let (add, remove) = reconcile(&[1, 2, 3], &[3, 4, 4, 5]);
        assert_eq!(add, vec![4, 5]);
        assert_eq!(remove, vec![1, 2]);

        let (add, remove) = reconcile(&[1, 2], &[2, 1]);
        assert!(add.is_empty() && remove.is_empty());
    }

    #[tokio::test]
    async fn grant_twice_is_success_then_conflict() {
        let (store, service) = setup().await;
        let a = principal(&store, "a@example.com").await;
        let b = principal(&store, "b@example.com").await;
        let role = service.create_role("admin", None).await.unwrap();

        let grant = service.grant_role(a, b, role.role_id).await.unwrap();
        assert_eq!(grant.granted_by, b);
        assert_eq!(grant.principal_id, a);

        let err = service.grant_role(a, b, role.role_id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn self_grant_is_bad_request_even_for_holders() {
        let (store, service) = setup().await;
        let a = principal(&store, "a@example.com").await;
        let b = principal(&store, "b@example.com").await;
        let admin = service.create_role("admin", None).await.unwrap();
        let editor = service.create_role("editor", None).await.unwrap();
        service.grant_role(a, b, admin.role_id).await.unwrap();

        let err = service.grant_role(a, a, editor.role_id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let err = service.revoke_role(a, a, admin.role_id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn grant_to_missing_principal_is_not_found_and_writes_nothing() {
        let (store, service) = setup().await;
        let b = principal(&store, "b@example.com").await;
        let role = service.create_role("admin", None).await.unwrap();

        let err = service.grant_role(4_242, b, role.role_id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(store.list_user_roles(4_242).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grant_of_missing_role_is_not_found() {
        let (store, service) = setup().await;
        let a = principal(&store, "a@example.com").await;
        let b = principal(&store, "b@example.com").await;

        let err = service.grant_role(a, b, 999).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn revoke_missing_grant_is_not_found() {
        let (store, service) = setup().await;
        let a = principal(&store, "a@example.com").await;
        let b = principal(&store, "b@example.com").await;
        let role = service.create_role("editor", None).await.unwrap();

        let err = service.revoke_role(a, b, role.role_id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        service.grant_role(a, b, role.role_id).await.unwrap();
        service.revoke_role(a, b, role.role_id).await.unwrap();
        assert!(service.list_principal_roles(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_permission_is_conflict() {
        let (_, service) = setup().await;
        service.create_permission("roles", "read").await.unwrap();
        let err = service.create_permission("roles", "read").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn replace_set_is_idempotent() {
        let (_, service) = setup().await;
        let role = service.create_role("editor", None).await.unwrap();
        let p1 = service.create_permission("articles", "read").await.unwrap();
        let p2 = service.create_permission("articles", "write").await.unwrap();
        let p3 = service.create_permission("articles", "delete").await.unwrap();

        service
            .set_role_permissions(role.role_id, &[p1.permission_id, p2.permission_id])
            .await
            .unwrap();
        let detail = service
            .set_role_permissions(role.role_id, &[p2.permission_id, p3.permission_id])
            .await
            .unwrap();
        let mut ids: Vec<i64> = detail.permissions.iter().map(|p| p.permission_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![p2.permission_id, p3.permission_id]);

        let again = service
            .set_role_permissions(role.role_id, &[p3.permission_id, p2.permission_id])
            .await
            .unwrap();
        assert_eq!(again.permissions.len(), 2);
    }

    #[tokio::test]
    async fn replace_set_with_unknown_permission_changes_nothing() {
        let (_, service) = setup().await;
        let endpoint = service.create_endpoint("/admin/roles", "get").await.unwrap();
        assert_eq!(endpoint.method, "GET");
        let p1 = service.create_permission("roles", "read").await.unwrap();
        service
            .set_endpoint_permissions(endpoint.endpoint_id, &[p1.permission_id])
            .await
            .unwrap();

        let err = service
            .set_endpoint_permissions(endpoint.endpoint_id, &[p1.permission_id, 9_999])
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let detail = service.get_endpoint(endpoint.endpoint_id).await.unwrap();
        assert_eq!(detail.permissions.len(), 1);
    }

    #[tokio::test]
    async fn preset_roles_can_be_deleted() {
        let (store, service) = setup().await;
        let preset = store.insert_role("admin", None, true).await.unwrap();
        service.delete_role(preset.role_id).await.unwrap();
        assert_eq!(
            service.get_role(preset.role_id).await.unwrap_err().status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn principal_listing_projects_admin_grant() {
        let (store, service) = setup().await;
        let a = principal(&store, "ada@example.com").await;
        let b = principal(&store, "bob@example.com").await;
        principal(&store, "carol@example.com").await;
        let admin = service.create_role("admin", None).await.unwrap();
        service.grant_role(a, b, admin.role_id).await.unwrap();

        let page = service
            .list_principals(None, PageRequest::new(1, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert!(page.has_next);
        assert_eq!(page.data.len(), 2);

        let ada = service
            .list_principals(Some("ADA"), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(ada.total, 1);
        assert!(ada.data[0].is_admin);
        assert_eq!(ada.data[0].admin_granted_by, Some(b));
        assert!(ada.data[0].admin_granted_utc.is_some());
    }
}
