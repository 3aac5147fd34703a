//! Endpoint authorization: registered endpoints, required permissions and
//! role grants, resolved on every request.

mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::{json, Value};

async fn endpoint_id(app: &TestApp, admin_cookie: &str, method: &str, pattern: &str) -> i64 {
    let res = app.get("/admin/endpoints", Some(admin_cookie)).await;
    assert_eq!(res.status, StatusCode::OK);
    res.body
        .as_array()
        .expect("endpoint list")
        .iter()
        .find(|e| e["method"] == method && e["path_pattern"] == pattern)
        .and_then(|e| e["endpoint_id"].as_i64())
        .expect("endpoint registered")
}

async fn permission_id(app: &TestApp, admin_cookie: &str, resource: &str, action: &str) -> i64 {
    let res = app.get("/admin/permissions", Some(admin_cookie)).await;
    assert_eq!(res.status, StatusCode::OK);
    res.body
        .as_array()
        .expect("permission list")
        .iter()
        .find(|p| p["resource"] == resource && p["action"] == action)
        .and_then(|p| p["permission_id"].as_i64())
        .expect("permission exists")
}

#[tokio::test]
async fn grant_role_scenario() {
    // Arrange
    let app = TestApp::spawn().await;
    let a = app.signup("a@example.com").await;
    let b = app.signup_admin("b@example.com").await;
    let c = app.signup("c@example.com").await;
    let grant_uri = format!("/admin/principals/{}/roles", a.principal_id);
    let body = json!({ "role_id": app.admin_role_id });

    // B grants admin to A.
    let granted = app.post(&grant_uri, Some(&b.cookie), body.clone()).await;
    assert_eq!(granted.status, StatusCode::OK);
    assert_eq!(granted.body["principal_id"], a.principal_id);
    assert_eq!(granted.body["role_id"], app.admin_role_id);
    assert_eq!(granted.body["granted_by"], b.principal_id);
    assert!(granted.body["granted_utc"].is_string());

    // B grants again.
    let again = app.post(&grant_uri, Some(&b.cookie), body.clone()).await;
    assert_eq!(again.status, StatusCode::CONFLICT);

    // A, now an admin, grants the role to itself.
    let self_grant = app.post(&grant_uri, Some(&a.cookie), body.clone()).await;
    assert_eq!(self_grant.status, StatusCode::BAD_REQUEST);

    // Nobody logged in.
    let anonymous = app.post(&grant_uri, None, body.clone()).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    // C holds no roles.
    let forbidden = app.post(&grant_uri, Some(&c.cookie), body).await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn self_grant_is_rejected_before_existence_checks() {
    let app = TestApp::spawn().await;
    let admin = app.signup_admin("root@example.com").await;

    let res = app
        .post(
            &format!("/admin/principals/{}/roles", admin.principal_id),
            Some(&admin.cookie),
            json!({ "role_id": 999_999 }),
        )
        .await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn grant_to_missing_principal_or_role_is_not_found() {
    let app = TestApp::spawn().await;
    let admin = app.signup_admin("root@example.com").await;
    let user = app.signup("user@example.com").await;

    let missing_principal = app
        .post(
            "/admin/principals/999999/roles",
            Some(&admin.cookie),
            json!({ "role_id": app.admin_role_id }),
        )
        .await;
    assert_eq!(missing_principal.status, StatusCode::NOT_FOUND);

    let missing_role = app
        .post(
            &format!("/admin/principals/{}/roles", user.principal_id),
            Some(&admin.cookie),
            json!({ "role_id": 999_999 }),
        )
        .await;
    assert_eq!(missing_role.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unregistered_endpoint_is_not_found() {
    let app = TestApp::spawn().await;
    let admin = app.signup_admin("root@example.com").await;
    let id = endpoint_id(&app, &admin.cookie, "GET", "/admin/roles").await;

    let deleted = app
        .request(
            Method::DELETE,
            &format!("/admin/endpoints/{}", id),
            Some(&admin.cookie),
            None,
        )
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    // The route still exists but is no longer a registered endpoint, even
    // for callers without a session.
    let res = app.get("/admin/roles", Some(&admin.cookie)).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    let anonymous = app.get("/admin/roles", None).await;
    assert_eq!(anonymous.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn endpoint_without_required_permissions_denies_everyone() {
    let app = TestApp::spawn().await;
    let admin = app.signup_admin("root@example.com").await;
    let id = endpoint_id(&app, &admin.cookie, "GET", "/admin/permissions").await;

    let cleared = app
        .request(
            Method::PUT,
            &format!("/admin/endpoints/{}/permissions", id),
            Some(&admin.cookie),
            Some(json!({ "permission_ids": [] })),
        )
        .await;
    assert_eq!(cleared.status, StatusCode::OK);
    assert_eq!(cleared.body["permissions"], json!([]));

    let res = app.get("/admin/permissions", Some(&admin.cookie)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_changes_apply_to_the_next_request() {
    // Arrange: a role holding only roles:read.
    let app = TestApp::spawn().await;
    let admin = app.signup_admin("root@example.com").await;
    let reader = app.signup("reader@example.com").await;

    assert_eq!(
        app.get("/admin/roles", Some(&reader.cookie)).await.status,
        StatusCode::FORBIDDEN
    );

    let role = app
        .post(
            "/admin/roles",
            Some(&admin.cookie),
            json!({ "role_name": "auditor", "description": "Read-only" }),
        )
        .await;
    assert_eq!(role.status, StatusCode::CREATED);
    let role_id = role.body["role_id"].as_i64().unwrap();
    let roles_read = permission_id(&app, &admin.cookie, "roles", "read").await;

    let set = app
        .request(
            Method::PUT,
            &format!("/admin/roles/{}/permissions", role_id),
            Some(&admin.cookie),
            Some(json!({ "permission_ids": [roles_read] })),
        )
        .await;
    assert_eq!(set.status, StatusCode::OK);

    // Act: grant, then revoke.
    let granted = app
        .post(
            &format!("/admin/principals/{}/roles", reader.principal_id),
            Some(&admin.cookie),
            json!({ "role_id": role_id }),
        )
        .await;
    assert_eq!(granted.status, StatusCode::OK);

    // Assert
    let allowed = app.get("/admin/roles", Some(&reader.cookie)).await;
    assert_eq!(allowed.status, StatusCode::OK);
    let names: Vec<&str> = allowed
        .body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["role_name"].as_str())
        .collect();
    assert!(names.contains(&"admin"));
    assert!(names.contains(&"auditor"));

    // roles:read does not cover roles:write.
    let write = app
        .post(
            "/admin/roles",
            Some(&reader.cookie),
            json!({ "role_name": "sneaky" }),
        )
        .await;
    assert_eq!(write.status, StatusCode::FORBIDDEN);

    let revoked = app
        .request(
            Method::DELETE,
            &format!("/admin/principals/{}/roles/{}", reader.principal_id, role_id),
            Some(&admin.cookie),
            None,
        )
        .await;
    assert_eq!(revoked.status, StatusCode::NO_CONTENT);
    assert_eq!(
        app.get("/admin/roles", Some(&reader.cookie)).await.status,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn revoke_rules() {
    let app = TestApp::spawn().await;
    let admin = app.signup_admin("root@example.com").await;
    let user = app.signup("user@example.com").await;

    let own = app
        .request(
            Method::DELETE,
            &format!(
                "/admin/principals/{}/roles/{}",
                admin.principal_id, app.admin_role_id
            ),
            Some(&admin.cookie),
            None,
        )
        .await;
    assert_eq!(own.status, StatusCode::BAD_REQUEST);

    let missing = app
        .request(
            Method::DELETE,
            &format!(
                "/admin/principals/{}/roles/{}",
                user.principal_id, app.admin_role_id
            ),
            Some(&admin.cookie),
            None,
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let anonymous = app
        .request(
            Method::DELETE,
            &format!(
                "/admin/principals/{}/roles/{}",
                user.principal_id, app.admin_role_id
            ),
            None,
            None,
        )
        .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_lists_granted_roles() {
    let app = TestApp::spawn().await;
    let admin = app.signup_admin("root@example.com").await;

    let res = app.get("/auth/me", Some(&admin.cookie)).await;

    assert_eq!(res.status, StatusCode::OK);
    let roles = res.body["roles"].as_array().cloned().unwrap_or_default();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0]["role_name"], Value::from("admin"));
    assert_eq!(roles[0]["preset_flag"], Value::from(true));
}
