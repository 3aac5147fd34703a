use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::pagination::{PageRequest, Paginated, DEFAULT_LIMIT, DEFAULT_PAGE};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::models::PrincipalWithGrant;

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

fn validate_identifier(value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && value.len() <= 64
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("identifier");
        err.message = Some("Must be 1 to 64 characters of a-z, 0-9, '_', '.' or '-'".into());
        Err(err)
    }
}

fn validate_path_pattern(value: &str) -> Result<(), ValidationError> {
    if value.starts_with('/') && !value.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        let mut err = ValidationError::new("path_pattern");
        err.message = Some("Path pattern must start with '/' and contain no whitespace".into());
        Err(err)
    }
}

fn validate_method(value: &str) -> Result<(), ValidationError> {
    if ALLOWED_METHODS.contains(&value.trim().to_ascii_uppercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("method");
        err.message = Some("Unsupported HTTP method".into());
        Err(err)
    }
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PrincipalListQuery {
    /// Case-insensitive match on email or display name.
    pub search: Option<String>,
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    #[param(minimum = 1, default = 1)]
    pub page: u32,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[param(minimum = 1, maximum = 100, default = 20)]
    pub limit: u32,
}

impl PrincipalListQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalPage {
    pub data: Vec<PrincipalWithGrant>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl From<Paginated<PrincipalWithGrant>> for PrincipalPage {
    fn from(page: Paginated<PrincipalWithGrant>) -> Self {
        Self {
            data: page.data,
            page: page.page,
            limit: page.limit,
            total: page.total,
            total_pages: page.total_pages,
            has_next: page.has_next,
            has_prev: page.has_prev,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GrantRoleRequest {
    #[validate(range(min = 1, message = "Invalid role id"))]
    #[schema(example = 1)]
    pub role_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GrantRoleResponse {
    pub principal_id: i64,
    pub role_id: i64,
    pub granted_by: i64,
    pub granted_utc: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Role name must be 1 to 64 characters"))]
    #[schema(example = "editor")]
    pub role_name: String,
    #[validate(length(max = 255, message = "Description is too long"))]
    #[schema(example = "Can edit articles")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Role name must be 1 to 64 characters"))]
    pub role_name: Option<String>,
    #[validate(length(max = 255, message = "Description is too long"))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePermissionRequest {
    #[validate(custom(function = "validate_identifier"))]
    #[schema(example = "articles")]
    pub resource: String,
    #[validate(custom(function = "validate_identifier"))]
    #[schema(example = "publish")]
    pub action: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateEndpointRequest {
    #[validate(
        length(max = 255, message = "Path pattern is too long"),
        custom(function = "validate_path_pattern")
    )]
    #[schema(example = "/articles/:id")]
    pub path_pattern: String,
    #[validate(custom(function = "validate_method"))]
    #[schema(example = "PUT")]
    pub method: String,
}

/// Replaces the whole permission set of a role or endpoint.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetPermissionsRequest {
    #[validate(length(max = 256, message = "Too many permissions"))]
    #[schema(example = json!([1, 2]))]
    pub permission_ids: Vec<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SweepResponse {
    pub removed: u64,
}
