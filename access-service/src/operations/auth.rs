use async_trait::async_trait;
use axum::http::StatusCode;
use service_core::error::AppError;

use super::Operation;
use crate::dtos::auth::{LoginRequest, LoginResponse, MeResponse, SignupRequest, SignupResponse};
use crate::services::{Authenticated, IssuedSession, PrincipalRole, Provisioned};
use crate::utils::ClientInfo;
use crate::AppState;

pub struct SignUp;

pub struct SignUpInput {
    pub request: SignupRequest,
    pub client: ClientInfo,
}

#[async_trait]
impl Operation for SignUp {
    type Input = SignUpInput;
    type Output = (Provisioned, IssuedSession);
    type Body = SignupResponse;

    const NAME: &'static str = "sign_up";

    fn validate(&self, input: &Self::Input) -> Result<(), AppError> {
        if input.request.password.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Password cannot be blank"
            )));
        }
        Ok(())
    }

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        let SignUpInput { request, client } = input;
        let display_name = request
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let provisioned = state
            .provisioning
            .sign_up(
                &request.email,
                &request.password,
                display_name,
                client.request_id.as_deref(),
            )
            .await?;

        // Issued even when the provider withholds its own session pending
        // email confirmation; confirmation gates provider tokens only.
        let issued = state
            .sessions
            .create(
                provisioned.principal.principal_id,
                client.ip_address,
                client.user_agent,
            )
            .await?;

        Ok((provisioned, issued))
    }

    fn transform(&self, (provisioned, issued): Self::Output) -> Self::Body {
        SignupResponse {
            principal: provisioned.principal,
            provider_session: provisioned.provider_session,
            session_expires_utc: issued.session.expiry_utc,
            session_token: issued.token,
        }
    }

    fn success_status(&self) -> StatusCode {
        StatusCode::CREATED
    }
}

pub struct LogIn;

pub struct LogInInput {
    pub request: LoginRequest,
    pub client: ClientInfo,
}

#[async_trait]
impl Operation for LogIn {
    type Input = LogInInput;
    type Output = (Provisioned, IssuedSession);
    type Body = LoginResponse;

    const NAME: &'static str = "log_in";

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        let LogInInput { request, client } = input;

        let provisioned = state
            .provisioning
            .log_in(
                &request.email,
                &request.password,
                client.request_id.as_deref(),
            )
            .await?;

        let issued = state
            .sessions
            .create(
                provisioned.principal.principal_id,
                client.ip_address,
                client.user_agent,
            )
            .await?;

        Ok((provisioned, issued))
    }

    fn transform(&self, (provisioned, issued): Self::Output) -> Self::Body {
        LoginResponse {
            principal: provisioned.principal,
            session_expires_utc: issued.session.expiry_utc,
            session_token: issued.token,
        }
    }
}

/// Ends the session behind the presented token. An absent, unknown or
/// expired token is not an error.
pub struct LogOut;

#[async_trait]
impl Operation for LogOut {
    type Input = Option<String>;
    type Output = bool;
    type Body = ();

    const NAME: &'static str = "log_out";

    async fn execute(&self, state: &AppState, token: Self::Input) -> Result<Self::Output, AppError> {
        let Some(token) = token else {
            return Ok(false);
        };
        match state.sessions.find_by_token(&token).await? {
            Some(session) => {
                let deleted = state.sessions.delete(session.session_id).await?;
                tracing::info!(
                    session_id = %session.session_id,
                    principal_id = session.principal_id,
                    "Session ended"
                );
                Ok(deleted)
            }
            None => Ok(false),
        }
    }

    fn transform(&self, _deleted: Self::Output) -> Self::Body {}

    fn success_status(&self) -> StatusCode {
        StatusCode::NO_CONTENT
    }
}

pub struct Me;

#[async_trait]
impl Operation for Me {
    type Input = Authenticated;
    type Output = (Authenticated, Vec<PrincipalRole>);
    type Body = MeResponse;

    const NAME: &'static str = "me";

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError> {
        let roles = state
            .registry
            .list_principal_roles(input.principal.principal_id)
            .await?;
        Ok((input, roles))
    }

    fn transform(&self, (authenticated, roles): Self::Output) -> Self::Body {
        MeResponse {
            principal: authenticated.principal,
            roles,
            session_expires_utc: authenticated.session.expiry_utc,
        }
    }
}
