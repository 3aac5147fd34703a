use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::Principal;
use crate::services::{PrincipalRole, ProviderSession};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SignupRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 6, max = 128, message = "Password must be 6 to 128 characters"))]
    #[schema(example = "password123", min_length = 6)]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "Display name must be 1 to 100 characters"))]
    #[schema(example = "Ada Lovelace")]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignupResponse {
    pub principal: Principal,
    /// Session issued by the identity provider, when it issues one at signup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_session: Option<ProviderSession>,
    pub session_expires_utc: DateTime<Utc>,
    #[serde(skip)]
    pub session_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "password123")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub principal: Principal,
    pub session_expires_utc: DateTime<Utc>,
    #[serde(skip)]
    pub session_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub principal: Principal,
    pub roles: Vec<PrincipalRole>,
    pub session_expires_utc: DateTime<Utc>,
}
