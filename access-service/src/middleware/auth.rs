use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{services::Authenticated, utils::session_cookie::session_token, AppState};

fn request_token(state: &AppState, req: &Request) -> Option<String> {
    let jar = CookieJar::from_headers(req.headers());
    session_token(&jar, &state.config.session)
}

/// Resolve the session cookie, if any, and store the principal in request
/// extensions. Never rejects; handlers decide whether a principal is needed.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request_token(&state, &req);
    if let Some(authenticated) = state.authenticator.authenticate(token.as_deref()).await? {
        req.extensions_mut().insert(authenticated);
    }
    Ok(next.run(req).await)
}

/// Guard for registered endpoints: authenticate the caller, then let the
/// authorizer decide on the concrete path and method.
pub async fn authorization_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request_token(&state, &req);
    let path = req.uri().path().to_string();
    let method = req.method().as_str().to_string();

    let authenticated = state.authenticator.authenticate(token.as_deref()).await?;
    let decision = state
        .authorizer
        .authorize(authenticated.as_ref().map(|a| &a.principal), &path, &method)
        .await?;
    decision.into_result()?;

    if let Some(authenticated) = authenticated {
        req.extensions_mut().insert(authenticated);
    }

    Ok(next.run(req).await)
}

/// Extractor for the principal behind the request's session.
pub struct CurrentPrincipal(pub Authenticated);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let authenticated = parts
            .extensions
            .get::<Authenticated>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))?;

        Ok(CurrentPrincipal(authenticated))
    }
}
