//! Principal model - locally stored accounts linked to the identity provider.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

/// Active account.
///
/// `external_id` links the row to the identity provider's account and is
/// never changed once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow, ToSchema)]
pub struct Principal {
    pub principal_id: i64,
    pub email: String,
    pub display_name: Option<String>,
    pub external_id: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Fields supplied when creating a principal; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub email: String,
    pub display_name: Option<String>,
    pub external_id: Option<String>,
}

impl NewPrincipal {
    pub fn new(email: impl Into<String>, display_name: Option<String>, external_id: Option<String>) -> Self {
        Self {
            email: normalize_email(&email.into()),
            display_name,
            external_id,
        }
    }
}

/// Principal row joined with its administrative role grant, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow, ToSchema)]
pub struct PrincipalWithGrant {
    pub principal_id: i64,
    pub email: String,
    pub display_name: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub is_admin: bool,
    pub admin_granted_by: Option<i64>,
    pub admin_granted_utc: Option<DateTime<Utc>>,
}

/// Emails are compared case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
