pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod operations;
pub mod services;
pub mod utils;

use metrics_exporter_prometheus::PrometheusHandle;
use service_core::axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AccessConfig, Environment, SwaggerMode};
use crate::services::{
    Authenticator, Authorizer, IdentityProvider, PrincipalStore, ProvisioningService,
    RegistryService, SessionService, Stores,
};
use service_core::error::AppError;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::metrics::metrics,
        handlers::auth::signup,
        handlers::auth::login,
        handlers::auth::logout,
        handlers::auth::me,
        handlers::admin::list_principals,
        handlers::admin::list_principal_roles,
        handlers::admin::grant_role,
        handlers::admin::revoke_role,
        handlers::admin::list_roles,
        handlers::admin::get_role,
        handlers::admin::create_role,
        handlers::admin::update_role,
        handlers::admin::delete_role,
        handlers::admin::set_role_permissions,
        handlers::admin::list_permissions,
        handlers::admin::create_permission,
        handlers::admin::delete_permission,
        handlers::admin::list_endpoints,
        handlers::admin::get_endpoint,
        handlers::admin::create_endpoint,
        handlers::admin::delete_endpoint,
        handlers::admin::set_endpoint_permissions,
        handlers::admin::sweep_sessions,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::SignupRequest,
            dtos::auth::SignupResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::MeResponse,
            dtos::admin::PrincipalPage,
            dtos::admin::GrantRoleRequest,
            dtos::admin::GrantRoleResponse,
            dtos::admin::CreateRoleRequest,
            dtos::admin::UpdateRoleRequest,
            dtos::admin::CreatePermissionRequest,
            dtos::admin::CreateEndpointRequest,
            dtos::admin::SetPermissionsRequest,
            dtos::admin::SweepResponse,
            models::Principal,
            models::PrincipalWithGrant,
            models::Role,
            models::Permission,
            models::Endpoint,
            models::UserRole,
            services::RoleDetail,
            services::EndpointDetail,
            services::PrincipalRole,
            services::ProviderSession,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Signup, login and session management"),
        (name = "Administration", description = "Roles, permissions, endpoints and grants"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("session_id"))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AccessConfig,
    pub principals: Arc<dyn PrincipalStore>,
    pub sessions: SessionService,
    pub authenticator: Authenticator,
    pub authorizer: Authorizer,
    pub registry: RegistryService,
    pub provisioning: ProvisioningService,
    pub metrics: Option<PrometheusHandle>,
    pub login_rate_limiter: IpRateLimiter,
    pub signup_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(
        config: AccessConfig,
        stores: &Stores,
        provider: Arc<dyn IdentityProvider>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let sessions = SessionService::new(
            stores.sessions.clone(),
            chrono::Duration::hours(config.session.ttl_hours),
        );
        let authenticator = Authenticator::new(sessions.clone(), stores.principals.clone());
        let authorizer = Authorizer::new(stores.registry.clone());
        let registry = RegistryService::new(
            stores.registry.clone(),
            stores.principals.clone(),
            config.authorization.admin_role_name.clone(),
        );
        let provisioning = ProvisioningService::new(provider, stores.principals.clone());

        let limits = &config.rate_limit;
        let login_rate_limiter =
            create_ip_rate_limiter(limits.login_attempts, limits.login_window_seconds);
        let signup_rate_limiter =
            create_ip_rate_limiter(limits.signup_attempts, limits.signup_window_seconds);
        let ip_rate_limiter =
            create_ip_rate_limiter(limits.global_ip_limit, limits.global_ip_window_seconds);

        Self {
            principals: stores.principals.clone(),
            sessions,
            authenticator,
            authorizer,
            registry,
            provisioning,
            metrics,
            login_rate_limiter,
            signup_rate_limiter,
            ip_rate_limiter,
            config,
        }
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // Every admin route is a registered endpoint; the authorizer decides.
    let admin_routes = Router::new()
        .route("/admin/principals", get(handlers::admin::list_principals))
        .route(
            "/admin/principals/:id/roles",
            get(handlers::admin::list_principal_roles).post(handlers::admin::grant_role),
        )
        .route(
            "/admin/principals/:id/roles/:role_id",
            delete(handlers::admin::revoke_role),
        )
        .route(
            "/admin/roles",
            get(handlers::admin::list_roles).post(handlers::admin::create_role),
        )
        .route(
            "/admin/roles/:id",
            get(handlers::admin::get_role)
                .patch(handlers::admin::update_role)
                .delete(handlers::admin::delete_role),
        )
        .route(
            "/admin/roles/:id/permissions",
            put(handlers::admin::set_role_permissions),
        )
        .route(
            "/admin/permissions",
            get(handlers::admin::list_permissions).post(handlers::admin::create_permission),
        )
        .route(
            "/admin/permissions/:id",
            delete(handlers::admin::delete_permission),
        )
        .route(
            "/admin/endpoints",
            get(handlers::admin::list_endpoints).post(handlers::admin::create_endpoint),
        )
        .route(
            "/admin/endpoints/:id",
            get(handlers::admin::get_endpoint).delete(handlers::admin::delete_endpoint),
        )
        .route(
            "/admin/endpoints/:id/permissions",
            put(handlers::admin::set_endpoint_permissions),
        )
        .route(
            "/admin/sessions/sweep",
            post(handlers::admin::sweep_sessions),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::authorization_middleware,
        ));

    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let signup_route = Router::new()
        .route("/auth/signup", post(handlers::auth::signup))
        .layer(from_fn_with_state(
            state.signup_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let session_routes = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/logout", post(handlers::auth::logout))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ));

    let ip_limiter = state.ip_rate_limiter.clone();

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => state.config.swagger.enabled == SwaggerMode::Public,
    };

    if swagger_enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { service_core::axum::Json(ApiDoc::openapi()) }),
        );
    }

    let allowed_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let request_timeout = Duration::from_secs(state.config.common.request_timeout_seconds);

    let app = app
        .merge(signup_route)
        .merge(login_route)
        .merge(session_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_credentials(true)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::HeaderName::from_static("x-request-id"),
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Store is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<service_core::axum::Json<serde_json::Value>, AppError> {
    state.principals.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        e
    })?;

    Ok(service_core::axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up"
        }
    })))
}
