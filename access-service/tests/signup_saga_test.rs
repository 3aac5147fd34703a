//! Signup across the identity provider and the local store, including the
//! compensating delete when the local step fails.

mod common;

use access_service::{models::NewPrincipal, services::{MockIdentityProvider, PrincipalStore}};
use axum::http::StatusCode;
use common::{TestApp, TEST_PASSWORD};
use serde_json::json;

#[tokio::test]
async fn local_failure_removes_the_provider_account() {
    // Arrange: a local principal already owns the email, the provider does not.
    let app = TestApp::spawn().await;
    app.store
        .insert_principal(&NewPrincipal::new("taken@example.com", None, None))
        .await
        .unwrap();

    // Act
    let res = app
        .post(
            "/auth/signup",
            None,
            json!({ "email": "taken@example.com", "password": TEST_PASSWORD }),
        )
        .await;

    // Assert: the local conflict surfaces and the provider is rolled back.
    assert_eq!(res.status, StatusCode::CONFLICT);
    assert!(res.session_cookie().is_none());
    assert!(!app.provider.has_account("taken@example.com"));
}

#[tokio::test]
async fn failed_compensation_is_a_gateway_error() {
    let app = TestApp::spawn().await;
    app.store
        .insert_principal(&NewPrincipal::new("stuck@example.com", None, None))
        .await
        .unwrap();
    app.provider.fail_next_delete();

    let res = app
        .post(
            "/auth/signup",
            None,
            json!({ "email": "stuck@example.com", "password": TEST_PASSWORD }),
        )
        .await;

    assert_eq!(res.status, StatusCode::BAD_GATEWAY);
    assert_eq!(res.body["error"], "External service error");
    let details = res.body["details"].as_str().unwrap_or_default();
    assert!(details.contains("stuck@example.com"));
    assert!(details.contains("mock-"));
    // Neither nested failure is echoed to the caller.
    assert!(!details.contains("already exists"));
    assert!(!details.contains("unreachable"));
    // The orphaned provider account is left for an operator to reconcile.
    assert!(app.provider.has_account("stuck@example.com"));
}

#[tokio::test]
async fn signup_without_provider_session_still_opens_local_session() {
    let app = TestApp::spawn_with_provider(MockIdentityProvider::without_sessions()).await;

    let res = app
        .post(
            "/auth/signup",
            None,
            json!({ "email": "confirm@example.com", "password": TEST_PASSWORD }),
        )
        .await;

    assert_eq!(res.status, StatusCode::CREATED);
    assert!(res.body.get("provider_session").is_none());
    let cookie = res.session_cookie().expect("session cookie");
    assert_eq!(app.get("/auth/me", Some(&cookie)).await.status, StatusCode::OK);
}

#[tokio::test]
async fn successful_signup_links_principal_to_provider_account() {
    let app = TestApp::spawn().await;

    let user = app.signup("linked@example.com").await;

    let principal = app
        .store
        .find_principal_by_email("linked@example.com")
        .await
        .unwrap()
        .expect("principal stored");
    assert_eq!(principal.principal_id, user.principal_id);
    let external_id = principal.external_id.expect("external id");
    let by_external = app
        .store
        .find_principal_by_external_id(&external_id)
        .await
        .unwrap();
    assert_eq!(by_external.map(|p| p.principal_id), Some(user.principal_id));
    assert!(app.provider.has_account("linked@example.com"));
}
