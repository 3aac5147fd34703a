//! Administration of principals, roles, permissions and endpoints.
//!
//! Every route here is registered as an endpoint and guarded by
//! `authorization_middleware`.

use service_core::{
    axum::{
        extract::{Path, State},
        response::IntoResponse,
    },
    error::AppError,
};

use crate::{
    dtos::admin::{
        CreateEndpointRequest, CreatePermissionRequest, CreateRoleRequest, GrantRoleRequest,
        PrincipalListQuery, SetPermissionsRequest, UpdateRoleRequest,
    },
    middleware::CurrentPrincipal,
    models::RoleUpdate,
    operations::{
        admin::{
            CreateEndpoint, CreateEndpointInput, CreatePermission, CreatePermissionInput,
            CreateRole, CreateRoleInput, DeleteEndpoint, DeletePermission, DeleteRole,
            GetEndpoint, GetRole, GrantRole, ListEndpoints, ListPermissions, ListPrincipalRoles,
            ListPrincipals, ListPrincipalsInput, ListRoles, RevokeRole, RoleGrantInput,
            SetEndpointPermissions, SetPermissionsInput, SetRolePermissions, SweepSessions,
            UpdateRole, UpdateRoleInput,
        },
        run_operation,
    },
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

// ==================== Principals ====================

/// List principals with their administrative grant
#[utoipa::path(
    get,
    path = "/admin/principals",
    params(PrincipalListQuery),
    responses(
        (status = 200, description = "Page of principals", body = PrincipalPage),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "Insufficient permissions", body = ErrorResponse),
        (status = 422, description = "Invalid paging parameters", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn list_principals(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<PrincipalListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let input = ListPrincipalsInput {
        page: query.page_request(),
        search: query.search,
    };
    run_operation(&ListPrincipals, &state, input).await
}

/// Roles held by a principal
#[utoipa::path(
    get,
    path = "/admin/principals/{id}/roles",
    params(("id" = i64, Path, description = "Principal id")),
    responses(
        (status = 200, description = "Roles with grant details", body = [PrincipalRole]),
        (status = 404, description = "Principal not found", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn list_principal_roles(
    State(state): State<AppState>,
    Path(principal_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    run_operation(&ListPrincipalRoles, &state, principal_id).await
}

/// Grant a role to a principal
#[utoipa::path(
    post,
    path = "/admin/principals/{id}/roles",
    params(("id" = i64, Path, description = "Principal receiving the role")),
    request_body = GrantRoleRequest,
    responses(
        (status = 200, description = "Role granted", body = GrantRoleResponse),
        (status = 400, description = "Principals cannot grant roles to themselves", body = ErrorResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "Insufficient permissions", body = ErrorResponse),
        (status = 404, description = "Principal or role not found", body = ErrorResponse),
        (status = 409, description = "Role already granted", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn grant_role(
    State(state): State<AppState>,
    CurrentPrincipal(acting): CurrentPrincipal,
    Path(principal_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<GrantRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = RoleGrantInput {
        target_principal_id: principal_id,
        acting_principal_id: acting.principal.principal_id,
        role_id: req.role_id,
    };
    run_operation(&GrantRole, &state, input).await
}

/// Revoke a role from a principal
#[utoipa::path(
    delete,
    path = "/admin/principals/{id}/roles/{role_id}",
    params(
        ("id" = i64, Path, description = "Principal losing the role"),
        ("role_id" = i64, Path, description = "Role to revoke")
    ),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 400, description = "Principals cannot revoke their own roles", body = ErrorResponse),
        (status = 404, description = "No such grant", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    CurrentPrincipal(acting): CurrentPrincipal,
    Path((principal_id, role_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let input = RoleGrantInput {
        target_principal_id: principal_id,
        acting_principal_id: acting.principal.principal_id,
        role_id,
    };
    run_operation(&RevokeRole, &state, input).await
}

// ==================== Roles ====================

/// List roles
#[utoipa::path(
    get,
    path = "/admin/roles",
    responses((status = 200, description = "All roles", body = [Role])),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn list_roles(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    run_operation(&ListRoles, &state, ()).await
}

/// Role with its permissions
#[utoipa::path(
    get,
    path = "/admin/roles/{id}",
    params(("id" = i64, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role detail", body = RoleDetail),
        (status = 404, description = "Role not found", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    Path(role_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    run_operation(&GetRole, &state, role_id).await
}

/// Create a role
#[utoipa::path(
    post,
    path = "/admin/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name taken", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = CreateRoleInput {
        role_name: req.role_name,
        description: req.description,
    };
    run_operation(&CreateRole, &state, input).await
}

/// Rename a role or change its description
#[utoipa::path(
    patch,
    path = "/admin/roles/{id}",
    params(("id" = i64, Path, description = "Role id")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "Role not found", body = ErrorResponse),
        (status = 409, description = "Role name taken", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    Path(role_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = UpdateRoleInput {
        role_id,
        update: RoleUpdate {
            role_name: req.role_name.map(|name| name.trim().to_string()),
            description: req.description,
        },
    };
    run_operation(&UpdateRole, &state, input).await
}

/// Delete a role and its grants
#[utoipa::path(
    delete,
    path = "/admin/roles/{id}",
    params(("id" = i64, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    Path(role_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    run_operation(&DeleteRole, &state, role_id).await
}

/// Replace the permissions a role holds
#[utoipa::path(
    put,
    path = "/admin/roles/{id}/permissions",
    params(("id" = i64, Path, description = "Role id")),
    request_body = SetPermissionsRequest,
    responses(
        (status = 200, description = "Role detail after the change", body = RoleDetail),
        (status = 404, description = "Role or permission not found", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn set_role_permissions(
    State(state): State<AppState>,
    Path(role_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<SetPermissionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = SetPermissionsInput {
        id: role_id,
        permission_ids: req.permission_ids,
    };
    run_operation(&SetRolePermissions, &state, input).await
}

// ==================== Permissions ====================

/// List permissions
#[utoipa::path(
    get,
    path = "/admin/permissions",
    responses((status = 200, description = "All permissions", body = [Permission])),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn list_permissions(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    run_operation(&ListPermissions, &state, ()).await
}

/// Create a permission
#[utoipa::path(
    post,
    path = "/admin/permissions",
    request_body = CreatePermissionRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission already exists", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreatePermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = CreatePermissionInput {
        resource: req.resource,
        action: req.action,
    };
    run_operation(&CreatePermission, &state, input).await
}

/// Delete a permission and every link to it
#[utoipa::path(
    delete,
    path = "/admin/permissions/{id}",
    params(("id" = i64, Path, description = "Permission id")),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 404, description = "Permission not found", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    Path(permission_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    run_operation(&DeletePermission, &state, permission_id).await
}

// ==================== Endpoints ====================

/// List registered endpoints
#[utoipa::path(
    get,
    path = "/admin/endpoints",
    responses((status = 200, description = "All endpoints", body = [Endpoint])),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn list_endpoints(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    run_operation(&ListEndpoints, &state, ()).await
}

/// Endpoint with its required permissions
#[utoipa::path(
    get,
    path = "/admin/endpoints/{id}",
    params(("id" = i64, Path, description = "Endpoint id")),
    responses(
        (status = 200, description = "Endpoint detail", body = EndpointDetail),
        (status = 404, description = "Endpoint not found", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn get_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    run_operation(&GetEndpoint, &state, endpoint_id).await
}

/// Register an endpoint
#[utoipa::path(
    post,
    path = "/admin/endpoints",
    request_body = CreateEndpointRequest,
    responses(
        (status = 201, description = "Endpoint registered", body = Endpoint),
        (status = 409, description = "Endpoint already registered", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn create_endpoint(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateEndpointRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = CreateEndpointInput {
        path_pattern: req.path_pattern,
        method: req.method,
    };
    run_operation(&CreateEndpoint, &state, input).await
}

/// Remove an endpoint registration
#[utoipa::path(
    delete,
    path = "/admin/endpoints/{id}",
    params(("id" = i64, Path, description = "Endpoint id")),
    responses(
        (status = 204, description = "Endpoint removed"),
        (status = 404, description = "Endpoint not found", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn delete_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    run_operation(&DeleteEndpoint, &state, endpoint_id).await
}

/// Replace the permissions an endpoint requires
#[utoipa::path(
    put,
    path = "/admin/endpoints/{id}/permissions",
    params(("id" = i64, Path, description = "Endpoint id")),
    request_body = SetPermissionsRequest,
    responses(
        (status = 200, description = "Endpoint detail after the change", body = EndpointDetail),
        (status = 404, description = "Endpoint or permission not found", body = ErrorResponse)
    ),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn set_endpoint_permissions(
    State(state): State<AppState>,
    Path(endpoint_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<SetPermissionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = SetPermissionsInput {
        id: endpoint_id,
        permission_ids: req.permission_ids,
    };
    run_operation(&SetEndpointPermissions, &state, input).await
}

// ==================== Sessions ====================

/// Delete every expired session
#[utoipa::path(
    post,
    path = "/admin/sessions/sweep",
    responses((status = 200, description = "Number of sessions removed", body = SweepResponse)),
    tag = "Administration",
    security(("session_cookie" = []))
)]
pub async fn sweep_sessions(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    run_operation(&SweepSessions, &state, ()).await
}
