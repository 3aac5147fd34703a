use axum_extra::extract::cookie::CookieJar;
use service_core::{
    axum::{extract::State, response::IntoResponse},
    error::AppError,
};

use crate::{
    dtos::auth::{LoginRequest, SignupRequest},
    middleware::CurrentPrincipal,
    operations::{
        auth::{LogIn, LogInInput, LogOut, Me, SignUp, SignUpInput},
        run_operation,
    },
    utils::{
        session_cookie::{removal_cookie, session_cookie, session_token},
        ClientInfo, ValidatedJson,
    },
    AppState,
};

/// Create an account at the identity provider and its local principal
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account provisioned; session cookie set", body = SignupResponse),
        (status = 400, description = "Malformed request or rejected by the identity provider", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many signup attempts", body = ErrorResponse),
        (status = 502, description = "Identity provider failure", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = run_operation(
        &SignUp,
        &state,
        SignUpInput {
            request: req,
            client,
        },
    )
    .await?;

    let cookie = session_cookie(
        &state.config.session,
        res.body.session_token.clone(),
        res.body.session_expires_utc,
    );
    Ok((jar.add(cookie), res))
}

/// Log in with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful; session cookie set", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 404, description = "No principal linked to the account", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many login attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = run_operation(
        &LogIn,
        &state,
        LogInInput {
            request: req,
            client,
        },
    )
    .await?;

    let cookie = session_cookie(
        &state.config.session,
        res.body.session_token.clone(),
        res.body.session_expires_utc,
    );
    Ok((jar.add(cookie), res))
}

/// End the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Session ended and cookie cleared")
    ),
    tag = "Authentication",
    security(
        ("session_cookie" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let token = session_token(&jar, &state.config.session);
    let res = run_operation(&LogOut, &state, token).await?;
    Ok((jar.remove(removal_cookie(&state.config.session)), res))
}

/// Current principal and its roles
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Authenticated principal", body = MeResponse),
        (status = 401, description = "No live session", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("session_cookie" = [])
    )
)]
pub async fn me(
    State(state): State<AppState>,
    CurrentPrincipal(authenticated): CurrentPrincipal,
) -> Result<impl IntoResponse, AppError> {
    run_operation(&Me, &state, authenticated).await
}
