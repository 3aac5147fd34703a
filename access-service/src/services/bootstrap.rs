//! Default catalog seeded at startup.
//!
//! Every protected route is registered as an endpoint guarded by one
//! permission, and the preset administrative role holds all of them.
//! Running the bootstrap again changes nothing.

use chrono::Utc;
use service_core::error::AppError;

use super::store::{PrincipalStore, RegistryStore};
use crate::models::{Endpoint, Permission, Role, UserRole};

/// One protected route: method, path pattern, and the permission it requires.
pub struct ProtectedRoute {
    pub method: &'static str,
    pub path: &'static str,
    pub resource: &'static str,
    pub action: &'static str,
}

const fn route(
    method: &'static str,
    path: &'static str,
    resource: &'static str,
    action: &'static str,
) -> ProtectedRoute {
    ProtectedRoute {
        method,
        path,
        resource,
        action,
    }
}

pub const PROTECTED_ROUTES: &[ProtectedRoute] = &[
    route("GET", "/admin/principals", "principals", "read"),
    route("GET", "/admin/principals/:id/roles", "principals", "read"),
    route("POST", "/admin/principals/:id/roles", "user_roles", "grant"),
    route("DELETE", "/admin/principals/:id/roles/:role_id", "user_roles", "revoke"),
    route("GET", "/admin/roles", "roles", "read"),
    route("POST", "/admin/roles", "roles", "write"),
    route("GET", "/admin/roles/:id", "roles", "read"),
    route("PATCH", "/admin/roles/:id", "roles", "write"),
    route("DELETE", "/admin/roles/:id", "roles", "delete"),
    route("PUT", "/admin/roles/:id/permissions", "roles", "write"),
    route("GET", "/admin/permissions", "permissions", "read"),
    route("POST", "/admin/permissions", "permissions", "write"),
    route("DELETE", "/admin/permissions/:id", "permissions", "delete"),
    route("GET", "/admin/endpoints", "endpoints", "read"),
    route("POST", "/admin/endpoints", "endpoints", "write"),
    route("GET", "/admin/endpoints/:id", "endpoints", "read"),
    route("DELETE", "/admin/endpoints/:id", "endpoints", "delete"),
    route("PUT", "/admin/endpoints/:id/permissions", "endpoints", "write"),
    route("POST", "/admin/sessions/sweep", "sessions", "sweep"),
];

/// What the bootstrap created on this run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub admin_role_id: i64,
    pub permissions_created: usize,
    pub endpoints_created: usize,
    pub links_created: usize,
    pub admin_granted: bool,
}

async fn ensure_role<R>(registry: &R, role_name: &str) -> Result<(Role, bool), AppError>
where
    R: RegistryStore + ?Sized,
{
    if let Some(role) = registry.find_role_by_name(role_name).await? {
        return Ok((role, false));
    }
    match registry
        .insert_role(role_name, Some("System administrator"), true)
        .await
    {
        Ok(role) => Ok((role, true)),
        Err(AppError::Conflict(_)) => registry
            .find_role_by_name(role_name)
            .await?
            .map(|role| (role, false))
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Role {} vanished", role_name))),
        Err(e) => Err(e),
    }
}

async fn ensure_permission<R>(
    registry: &R,
    resource: &str,
    action: &str,
) -> Result<(Permission, bool), AppError>
where
    R: RegistryStore + ?Sized,
{
    if let Some(permission) = registry.find_permission(resource, action).await? {
        return Ok((permission, false));
    }
    match registry.insert_permission(resource, action).await {
        Ok(permission) => Ok((permission, true)),
        Err(AppError::Conflict(_)) => registry
            .find_permission(resource, action)
            .await?
            .map(|p| (p, false))
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Permission {}:{} vanished",
                    resource,
                    action
                ))
            }),
        Err(e) => Err(e),
    }
}

async fn ensure_endpoint<R>(
    registry: &R,
    path: &str,
    method: &str,
) -> Result<(Endpoint, bool), AppError>
where
    R: RegistryStore + ?Sized,
{
    if let Some(endpoint) = registry.find_endpoint(path, method).await? {
        return Ok((endpoint, false));
    }
    match registry.insert_endpoint(path, method).await {
        Ok(endpoint) => Ok((endpoint, true)),
        Err(AppError::Conflict(_)) => registry
            .find_endpoint(path, method)
            .await?
            .map(|e| (e, false))
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Endpoint {} {} vanished", method, path))
            }),
        Err(e) => Err(e),
    }
}

/// Insert a link, treating an existing one as success. Returns whether the
/// link was new.
fn link_created(result: Result<(), AppError>) -> Result<bool, AppError> {
    match result {
        Ok(()) => Ok(true),
        Err(AppError::Conflict(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn seed_default_catalog<R, P>(
    registry: &R,
    principals: &P,
    admin_role_name: &str,
    bootstrap_admin_email: Option<&str>,
) -> Result<BootstrapReport, AppError>
where
    R: RegistryStore + ?Sized,
    P: PrincipalStore + ?Sized,
{
    let (admin, _) = ensure_role(registry, admin_role_name).await?;
    let mut report = BootstrapReport {
        admin_role_id: admin.role_id,
        ..Default::default()
    };

    let admin_permissions = registry.role_permission_ids(admin.role_id).await?;

    for route in PROTECTED_ROUTES {
        let (permission, new_permission) =
            ensure_permission(registry, route.resource, route.action).await?;
        let (endpoint, new_endpoint) = ensure_endpoint(registry, route.path, route.method).await?;
        report.permissions_created += usize::from(new_permission);
        report.endpoints_created += usize::from(new_endpoint);

        let required = registry.endpoint_permission_ids(endpoint.endpoint_id).await?;
        if !required.contains(&permission.permission_id)
            && link_created(
                registry
                    .add_endpoint_permission(endpoint.endpoint_id, permission.permission_id)
                    .await,
            )?
        {
            report.links_created += 1;
        }

        if !admin_permissions.contains(&permission.permission_id)
            && link_created(
                registry
                    .add_role_permission(admin.role_id, permission.permission_id)
                    .await,
            )?
        {
            report.links_created += 1;
        }
    }

    if let Some(email) = bootstrap_admin_email {
        match principals.find_principal_by_email(email).await? {
            Some(principal) => {
                if registry
                    .find_user_role(principal.principal_id, admin.role_id)
                    .await?
                    .is_none()
                {
                    let grant = UserRole {
                        principal_id: principal.principal_id,
                        role_id: admin.role_id,
                        granted_by: principal.principal_id,
                        granted_utc: Utc::now(),
                    };
                    report.admin_granted = link_created(registry.insert_user_role(&grant).await)?;
                }
            }
            None => tracing::warn!(
                email = %email,
                "Bootstrap admin principal does not exist yet; skipping grant"
            ),
        }
    }

    tracing::info!(
        admin_role_id = report.admin_role_id,
        permissions_created = report.permissions_created,
        endpoints_created = report.endpoints_created,
        links_created = report.links_created,
        admin_granted = report.admin_granted,
        "Default catalog ensured"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPrincipal;
    use crate::services::MemoryStore;
    use std::collections::HashSet;

    #[tokio::test]
    async fn seeding_twice_creates_nothing_new() {
        let store = MemoryStore::new();
        let first = seed_default_catalog(&store, &store, "admin", None).await.unwrap();
        assert_eq!(first.endpoints_created, PROTECTED_ROUTES.len());
        assert!(first.links_created >= PROTECTED_ROUTES.len());

        let second = seed_default_catalog(&store, &store, "admin", None).await.unwrap();
        assert_eq!(second.admin_role_id, first.admin_role_id);
        assert_eq!(second.permissions_created, 0);
        assert_eq!(second.endpoints_created, 0);
        assert_eq!(second.links_created, 0);
    }

    #[tokio::test]
    async fn admin_role_holds_every_route_permission() {
        let store = MemoryStore::new();
        let report = seed_default_catalog(&store, &store, "admin", None).await.unwrap();

        let role = store.find_role_by_id(report.admin_role_id).await.unwrap().unwrap();
        assert!(role.preset_flag);

        let held: HashSet<i64> = store
            .role_permission_ids(report.admin_role_id)
            .await
            .unwrap()
            .into_iter()
            .collect();
        for endpoint in store.list_endpoints().await.unwrap() {
            let required = store.endpoint_permission_ids(endpoint.endpoint_id).await.unwrap();
            assert_eq!(required.len(), 1, "{} {}", endpoint.method, endpoint.path_pattern);
            assert!(held.contains(&required[0]));
        }
    }

    #[tokio::test]
    async fn bootstrap_admin_is_granted_once() {
        let store = MemoryStore::new();
        let principal = store
            .insert_principal(&NewPrincipal::new("root@example.com", None, None))
            .await
            .unwrap();

        let report = seed_default_catalog(&store, &store, "admin", Some("root@example.com"))
            .await
            .unwrap();
        assert!(report.admin_granted);

        let grant = store
            .find_user_role(principal.principal_id, report.admin_role_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.granted_by, principal.principal_id);

        let again = seed_default_catalog(&store, &store, "admin", Some("root@example.com"))
            .await
            .unwrap();
        assert!(!again.admin_granted);
    }

    #[tokio::test]
    async fn missing_bootstrap_admin_is_skipped() {
        let store = MemoryStore::new();
        let report = seed_default_catalog(&store, &store, "admin", Some("nobody@example.com"))
            .await
            .unwrap();
        assert!(!report.admin_granted);
    }
}
