//! Permission model - atomic (resource, action) capabilities.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow, ToSchema)]
pub struct Permission {
    pub permission_id: i64,
    pub resource: String,
    pub action: String,
    pub created_utc: DateTime<Utc>,
}

impl Permission {
    /// `resource:action`, used in logs and denial messages.
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}
