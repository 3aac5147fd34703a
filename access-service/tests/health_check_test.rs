//! Health, metrics and API document endpoints.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use tower::ServiceExt;

#[tokio::test]
async fn health_check_returns_200() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let res = app.get("/health", None).await;

    // Assert
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "healthy");
    assert_eq!(res.body["service"], "access-service-test");
    assert_eq!(res.body["checks"]["store"], "up");
    assert!(res.headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::spawn().await;

    let res = app
        .router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.headers().get("x-request-id").unwrap(), "req-123");
}

#[tokio::test]
async fn openapi_document_lists_protected_routes() {
    let app = TestApp::spawn().await;

    let res = app.get("/.well-known/openapi.json", None).await;

    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["paths"]["/auth/signup"].is_object());
    assert!(res.body["paths"]["/admin/principals/{id}/roles"]["post"].is_object());
    assert!(res.body["components"]["securitySchemes"]["session_cookie"].is_object());
}

#[tokio::test]
async fn metrics_without_recorder_is_not_found() {
    let app = TestApp::spawn().await;

    let res = app.get("/metrics", None).await;

    assert_eq!(res.status, StatusCode::NOT_FOUND);
}
