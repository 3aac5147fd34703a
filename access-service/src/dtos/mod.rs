pub mod admin;
pub mod auth;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of every failed request, as rendered by `AppError`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Principal not found")]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
