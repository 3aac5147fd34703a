use async_trait::async_trait;
use axum::http::StatusCode;
use service_core::error::AppError;
use service_core::pagination::{PageRequest, Paginated};

use super::Operation;
use crate::dtos::admin::{GrantRoleResponse, PrincipalPage, SweepResponse};
use crate::models::{Endpoint, Permission, PrincipalWithGrant, Role, RoleUpdate, UserRole};
use crate::services::registry::ensure_not_self;
use crate::services::{EndpointDetail, PrincipalRole, RoleDetail};
use crate::AppState;

// ==================== Principals ====================

pub struct ListPrincipals;

pub struct ListPrincipalsInput {
    pub search: Option<String>,
    pub page: PageRequest,
}

#[async_trait]
impl Operation for ListPrincipals {
    type Input = ListPrincipalsInput;
    type Output = Paginated<PrincipalWithGrant>;
    type Body = PrincipalPage;

    const NAME: &'static str = "list_principals";

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        state
            .registry
            .list_principals(input.search.as_deref(), input.page)
            .await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output.into()
    }
}

pub struct ListPrincipalRoles;

#[async_trait]
impl Operation for ListPrincipalRoles {
    type Input = i64;
    type Output = Vec<PrincipalRole>;
    type Body = Vec<PrincipalRole>;

    const NAME: &'static str = "list_principal_roles";

    async fn execute(&self, state: &AppState, principal_id: i64) -> Result<Self::Output, AppError> {
        state.registry.list_principal_roles(principal_id).await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }
}

/// Target, actor and role of a grant or revocation.
#[derive(Debug, Clone, Copy)]
pub struct RoleGrantInput {
    pub target_principal_id: i64,
    pub acting_principal_id: i64,
    pub role_id: i64,
}

pub struct GrantRole;

#[async_trait]
impl Operation for GrantRole {
    type Input = RoleGrantInput;
    type Output = UserRole;
    type Body = GrantRoleResponse;

    const NAME: &'static str = "grant_role";

    fn validate(&self, input: &Self::Input) -> Result<(), AppError> {
        ensure_not_self(input.target_principal_id, input.acting_principal_id)
    }

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        state
            .registry
            .grant_role(
                input.target_principal_id,
                input.acting_principal_id,
                input.role_id,
            )
            .await
    }

    fn transform(&self, grant: Self::Output) -> Self::Body {
        GrantRoleResponse {
            principal_id: grant.principal_id,
            role_id: grant.role_id,
            granted_by: grant.granted_by,
            granted_utc: grant.granted_utc,
        }
    }
}

pub struct RevokeRole;

#[async_trait]
impl Operation for RevokeRole {
    type Input = RoleGrantInput;
    type Output = ();
    type Body = ();

    const NAME: &'static str = "revoke_role";

    fn validate(&self, input: &Self::Input) -> Result<(), AppError> {
        ensure_not_self(input.target_principal_id, input.acting_principal_id)
    }

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        state
            .registry
            .revoke_role(
                input.target_principal_id,
                input.acting_principal_id,
                input.role_id,
            )
            .await
    }

    fn transform(&self, _output: Self::Output) -> Self::Body {}

    fn success_status(&self) -> StatusCode {
        StatusCode::NO_CONTENT
    }
}

// ==================== Roles ====================

pub struct ListRoles;

#[async_trait]
impl Operation for ListRoles {
    type Input = ();
    type Output = Vec<Role>;
    type Body = Vec<Role>;

    const NAME: &'static str = "list_roles";

    async fn execute(&self, state: &AppState, _input: ()) -> Result<Self::Output, AppError> {
        state.registry.list_roles().await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }
}

pub struct GetRole;

#[async_trait]
impl Operation for GetRole {
    type Input = i64;
    type Output = RoleDetail;
    type Body = RoleDetail;

    const NAME: &'static str = "get_role";

    async fn execute(&self, state: &AppState, role_id: i64) -> Result<Self::Output, AppError> {
        state.registry.get_role(role_id).await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }
}

pub struct CreateRole;

pub struct CreateRoleInput {
    pub role_name: String,
    pub description: Option<String>,
}

#[async_trait]
impl Operation for CreateRole {
    type Input = CreateRoleInput;
    type Output = Role;
    type Body = Role;

    const NAME: &'static str = "create_role";

    fn validate(&self, input: &Self::Input) -> Result<(), AppError> {
        if input.role_name.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Role name cannot be blank"
            )));
        }
        Ok(())
    }

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        state
            .registry
            .create_role(input.role_name.trim(), input.description.as_deref())
            .await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }

    fn success_status(&self) -> StatusCode {
        StatusCode::CREATED
    }
}

pub struct UpdateRole;

pub struct UpdateRoleInput {
    pub role_id: i64,
    pub update: RoleUpdate,
}

#[async_trait]
impl Operation for UpdateRole {
    type Input = UpdateRoleInput;
    type Output = Role;
    type Body = Role;

    const NAME: &'static str = "update_role";

    fn validate(&self, input: &Self::Input) -> Result<(), AppError> {
        let update = &input.update;
        if update.role_name.is_none() && update.description.is_none() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Nothing to update")));
        }
        if update
            .role_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Role name cannot be blank"
            )));
        }
        Ok(())
    }

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        state.registry.update_role(input.role_id, input.update).await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }
}

pub struct DeleteRole;

#[async_trait]
impl Operation for DeleteRole {
    type Input = i64;
    type Output = ();
    type Body = ();

    const NAME: &'static str = "delete_role";

    async fn execute(&self, state: &AppState, role_id: i64) -> Result<Self::Output, AppError> {
        state.registry.delete_role(role_id).await
    }

    fn transform(&self, _output: Self::Output) -> Self::Body {}

    fn success_status(&self) -> StatusCode {
        StatusCode::NO_CONTENT
    }
}

/// Owner id and the complete permission set it should end up holding.
pub struct SetPermissionsInput {
    pub id: i64,
    pub permission_ids: Vec<i64>,
}

pub struct SetRolePermissions;

#[async_trait]
impl Operation for SetRolePermissions {
    type Input = SetPermissionsInput;
    type Output = RoleDetail;
    type Body = RoleDetail;

    const NAME: &'static str = "set_role_permissions";

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        state
            .registry
            .set_role_permissions(input.id, &input.permission_ids)
            .await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }
}

// ==================== Permissions ====================

pub struct ListPermissions;

#[async_trait]
impl Operation for ListPermissions {
    type Input = ();
    type Output = Vec<Permission>;
    type Body = Vec<Permission>;

    const NAME: &'static str = "list_permissions";

    async fn execute(&self, state: &AppState, _input: ()) -> Result<Self::Output, AppError> {
        state.registry.list_permissions().await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }
}

pub struct CreatePermission;

pub struct CreatePermissionInput {
    pub resource: String,
    pub action: String,
}

#[async_trait]
impl Operation for CreatePermission {
    type Input = CreatePermissionInput;
    type Output = Permission;
    type Body = Permission;

    const NAME: &'static str = "create_permission";

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        state
            .registry
            .create_permission(&input.resource, &input.action)
            .await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }

    fn success_status(&self) -> StatusCode {
        StatusCode::CREATED
    }
}

pub struct DeletePermission;

#[async_trait]
impl Operation for DeletePermission {
    type Input = i64;
    type Output = ();
    type Body = ();

    const NAME: &'static str = "delete_permission";

    async fn execute(&self, state: &AppState, permission_id: i64) -> Result<Self::Output, AppError> {
        state.registry.delete_permission(permission_id).await
    }

    fn transform(&self, _output: Self::Output) -> Self::Body {}

    fn success_status(&self) -> StatusCode {
        StatusCode::NO_CONTENT
    }
}

// ==================== Endpoints ====================

pub struct ListEndpoints;

#[async_trait]
impl Operation for ListEndpoints {
    type Input = ();
    type Output = Vec<Endpoint>;
    type Body = Vec<Endpoint>;

    const NAME: &'static str = "list_endpoints";

    async fn execute(&self, state: &AppState, _input: ()) -> Result<Self::Output, AppError> {
        state.registry.list_endpoints().await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }
}

pub struct GetEndpoint;

#[async_trait]
impl Operation for GetEndpoint {
    type Input = i64;
    type Output = EndpointDetail;
    type Body = EndpointDetail;

    const NAME: &'static str = "get_endpoint";

    async fn execute(&self, state: &AppState, endpoint_id: i64) -> Result<Self::Output, AppError> {
        state.registry.get_endpoint(endpoint_id).await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }
}

pub struct CreateEndpoint;

pub struct CreateEndpointInput {
    pub path_pattern: String,
    pub method: String,
}

#[async_trait]
impl Operation for CreateEndpoint {
    type Input = CreateEndpointInput;
    type Output = Endpoint;
    type Body = Endpoint;

    const NAME: &'static str = "create_endpoint";

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        state
            .registry
            .create_endpoint(&input.path_pattern, &input.method)
            .await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }

    fn success_status(&self) -> StatusCode {
        StatusCode::CREATED
    }
}

pub struct DeleteEndpoint;

#[async_trait]
impl Operation for DeleteEndpoint {
    type Input = i64;
    type Output = ();
    type Body = ();

    const NAME: &'static str = "delete_endpoint";

    async fn execute(&self, state: &AppState, endpoint_id: i64) -> Result<Self::Output, AppError> {
        state.registry.delete_endpoint(endpoint_id).await
    }

    fn transform(&self, _output: Self::Output) -> Self::Body {}

    fn success_status(&self) -> StatusCode {
        StatusCode::NO_CONTENT
    }
}

pub struct SetEndpointPermissions;

#[async_trait]
impl Operation for SetEndpointPermissions {
    type Input = SetPermissionsInput;
    type Output = EndpointDetail;
    type Body = EndpointDetail;

    const NAME: &'static str = "set_endpoint_permissions";

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        state
            .registry
            .set_endpoint_permissions(input.id, &input.permission_ids)
            .await
    }

    fn transform(&self, output: Self::Output) -> Self::Body {
        output
    }
}

// ==================== Sessions ====================

pub struct SweepSessions;

#[async_trait]
impl Operation for SweepSessions {
    type Input = ();
    type Output = u64;
    type Body = SweepResponse;

    const NAME: &'static str = "sweep_sessions";

    async fn execute(&self, state: &AppState, _input: ()) -> Result<Self::Output, AppError> {
        state.sessions.delete_expired().await
    }

    fn transform(&self, removed: Self::Output) -> Self::Body {
        SweepResponse { removed }
    }
}
