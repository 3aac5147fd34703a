//! Role model and the grant links hanging off it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

/// Named bundle of permissions.
///
/// `preset_flag` marks roles seeded by the system; it is informational and
/// does not block updates or deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow, ToSchema)]
pub struct Role {
    pub role_id: i64,
    pub role_name: String,
    pub description: Option<String>,
    pub preset_flag: bool,
    pub created_utc: DateTime<Utc>,
}

/// Partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct RoleUpdate {
    pub role_name: Option<String>,
    pub description: Option<String>,
}

/// Role ↔ permission link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, FromRow)]
pub struct RolePermission {
    pub role_id: i64,
    pub permission_id: i64,
}

/// Principal ↔ role grant with its audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow, ToSchema)]
pub struct UserRole {
    pub principal_id: i64,
    pub role_id: i64,
    pub granted_by: i64,
    pub granted_utc: DateTime<Utc>,
}
