//! Test helper module for access-service integration tests.
//!
//! Wires the full router against the in-memory store and the mock identity
//! provider, and drives it with `oneshot` requests.

#![allow(dead_code)]

use access_service::{
    build_router,
    config::{
        AccessConfig, AuthorizationConfig, DatabaseConfig, Environment, IdentityProviderConfig,
        ProviderMode, RateLimitConfig, SecurityConfig, SessionConfig, StoreBackend,
        SwaggerConfig, SwaggerMode,
    },
    models::UserRole,
    services::{
        bootstrap::seed_default_catalog, MemoryStore, MockIdentityProvider, RegistryStore, Stores,
    },
    AppState,
};
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const COOKIE_NAME: &str = "session_id";
pub const TEST_PASSWORD: &str = "correct-horse";

pub fn create_test_config() -> AccessConfig {
    AccessConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "access-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        store: StoreBackend::Memory,
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 1,
        },
        identity_provider: IdentityProviderConfig {
            mode: ProviderMode::Mock,
            url: String::new(),
            anon_key: String::new(),
            service_key: String::new(),
            timeout_seconds: 5,
        },
        session: SessionConfig {
            ttl_hours: 24,
            cookie_name: COOKIE_NAME.to_string(),
            cookie_secure: false,
        },
        authorization: AuthorizationConfig {
            admin_role_name: "admin".to_string(),
            bootstrap_admin_email: None,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            signup_attempts: 100,
            signup_window_seconds: 60,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `name=value` pair of the session cookie set by this response.
    pub fn session_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .find(|pair| pair.starts_with(&format!("{}=", COOKIE_NAME)))
            .map(str::to_string)
    }

    pub fn set_cookie_header(&self) -> Option<String> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// A signed-up principal and its session cookie.
pub struct TestUser {
    pub principal_id: i64,
    pub email: String,
    pub cookie: String,
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MockIdentityProvider>,
    pub admin_role_id: i64,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_provider(MockIdentityProvider::new()).await
    }

    pub async fn spawn_with_provider(provider: MockIdentityProvider) -> Self {
        let config = create_test_config();
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(provider);
        let stores = Stores::shared(store.clone());

        let report = seed_default_catalog(
            store.as_ref(),
            store.as_ref(),
            &config.authorization.admin_role_name,
            None,
        )
        .await
        .expect("Failed to seed catalog");

        let state = AppState::new(config, &stores, provider.clone(), None);
        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self {
            router,
            state,
            store,
            provider,
            admin_role_id: report.admin_role_id,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, cookie, None).await
    }

    pub async fn post(&self, uri: &str, cookie: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, cookie, Some(body)).await
    }

    pub async fn signup(&self, email: &str) -> TestUser {
        let res = self
            .post(
                "/auth/signup",
                None,
                serde_json::json!({ "email": email, "password": TEST_PASSWORD }),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "signup failed: {}", res.body);

        TestUser {
            principal_id: res.body["principal"]["principal_id"]
                .as_i64()
                .expect("principal id"),
            email: email.to_string(),
            cookie: res.session_cookie().expect("session cookie"),
        }
    }

    /// Sign up a principal and grant it the administrative role directly in
    /// the store.
    pub async fn signup_admin(&self, email: &str) -> TestUser {
        let user = self.signup(email).await;
        self.store
            .insert_user_role(&UserRole {
                principal_id: user.principal_id,
                role_id: self.admin_role_id,
                granted_by: user.principal_id,
                granted_utc: chrono::Utc::now(),
            })
            .await
            .expect("Failed to grant admin role");
        user
    }
}
