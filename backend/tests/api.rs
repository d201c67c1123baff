//! HTTP flow tests: signup, login, session lookup against a file-backed store.

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use token_auth::api::server::{AppState, build_state, router};
use token_auth::config::AppConfig;

const SECRET: &str = "test-secret-jwt-key-min-32-chars!!";

async fn test_app(path: &Path) -> (Arc<AppState>, Router) {
    let config = AppConfig::new(SECRET).with_store_path(path.to_str().unwrap());
    let state = build_state(&config).await.unwrap();
    (state.clone(), router(state))
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, cookie, body)
}

async fn signup(app: &Router, username: &str, password: &str) -> (StatusCode, Value) {
    let (status, _, body) = send(
        app,
        json_request(
            "/api/signup",
            json!({ "username": username, "password": password }),
        ),
    )
    .await;
    (status, body)
}

async fn login(app: &Router, username: &str, password: &str) -> (StatusCode, Option<String>, Value) {
    send(
        app,
        json_request(
            "/api/login",
            json!({ "username": username, "password": password }),
        ),
    )
    .await
}

fn session_request(auth_header: Option<(&str, String)>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri("/api/session");
    if let Some((name, value)) = auth_header {
        builder = builder.header(name, value);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir.path().join("users.json")).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_signup_login_example() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir.path().join("users.json")).await;

    let (status, body) = signup(&app, "alice", "p1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({ "message": "Signup successful" }));

    let (status, cookie, body) = login(&app, "alice", "p1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    let token = body["token"].as_str().unwrap();
    assert!(!token.is_empty());

    let cookie = cookie.unwrap();
    assert!(cookie.starts_with(&format!("accessToken={token};")));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Max-Age=3600"));

    let (status, cookie, body) = login(&app, "alice", "wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(cookie.is_none());
    assert_eq!(body, json!({ "message": "Invalid credentials" }));
}

#[tokio::test]
async fn test_unknown_user_indistinguishable_from_wrong_password() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir.path().join("users.json")).await;
    signup(&app, "alice", "p1").await;

    let wrong_password = login(&app, "alice", "nope").await;
    let unknown_user = login(&app, "mallory", "p1").await;
    assert_eq!(wrong_password.0, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password, unknown_user);
}

#[tokio::test]
async fn test_signup_rejects_missing_fields_without_mutation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.json");
    let (state, app) = test_app(&path).await;

    let bodies = [
        json!({ "username": "", "password": "p1" }),
        json!({ "username": "alice", "password": "" }),
        json!({ "username": "alice" }),
        json!({ "password": "p1" }),
        json!({}),
    ];
    for body in bodies {
        let (status, _, body) = send(&app, json_request("/api/signup", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "message": "Signup fail" }));
    }

    let malformed = Request::builder()
        .method("POST")
        .uri("/api/signup")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let (status, _, _) = send(&app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let no_content_type = Request::builder()
        .method("POST")
        .uri("/api/signup")
        .body(Body::from(r#"{"username":"alice","password":"p1"}"#))
        .unwrap();
    let (status, _, _) = send(&app, no_content_type).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(state.auth.store().count().await, 0);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_login_rejects_malformed_body() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir.path().join("users.json")).await;

    let malformed = Request::builder()
        .method("POST")
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("garbage"))
        .unwrap();
    let (status, _, body) = send(&app, malformed).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "message": "Invalid credentials" }));

    let (status, _, _) = send(&app, json_request("/api/login", json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_storage_failure_is_internal_error() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    let (state, app) = test_app(&blocker.join("users.json")).await;

    // The document's parent directory can no longer be created
    std::fs::write(&blocker, "not a directory").unwrap();

    let (status, body) = signup(&app, "alice", "p1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "message": "Internal server error" }));
    assert_eq!(state.auth.store().count().await, 0);

    let (status, _, _) = login(&app, "alice", "p1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_duplicate_signup_conflicts() {
    let dir = TempDir::new().unwrap();
    let (state, app) = test_app(&dir.path().join("users.json")).await;

    assert_eq!(signup(&app, "alice", "p1").await.0, StatusCode::CREATED);
    let (status, body) = signup(&app, "alice", "p2").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({ "message": "Username already taken" }));
    assert_eq!(state.auth.store().count().await, 1);
}

#[tokio::test]
async fn test_session_endpoint() {
    let dir = TempDir::new().unwrap();
    let (_, app) = test_app(&dir.path().join("users.json")).await;
    signup(&app, "alice", "p1").await;
    signup(&app, "bob", "p2").await;

    let (_, cookie, body) = login(&app, "bob", "p2").await;
    let token = body["token"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        &app,
        session_request(Some(("authorization", format!("Bearer {token}")))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], 2);
    assert_eq!(body["username"], "bob");
    assert_eq!(
        body["expiresAt"].as_i64().unwrap() - body["issuedAt"].as_i64().unwrap(),
        3600
    );

    // The cookie set by login works on its own
    let cookie_pair = cookie.unwrap().split(';').next().unwrap().to_string();
    let (status, _, body) = send(&app, session_request(Some(("cookie", cookie_pair)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "bob");

    let (status, _, body) = send(&app, session_request(None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "message": "Invalid or expired token" }));

    let (status, _, _) = send(
        &app,
        session_request(Some(("authorization", "Bearer not.a.token".to_string()))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_accounts_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.json");
    {
        let (_, app) = test_app(&path).await;
        assert_eq!(signup(&app, "alice", "p1").await.0, StatusCode::CREATED);
    }

    let (state, app) = test_app(&path).await;
    let (status, _, _) = login(&app, "alice", "p1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.auth.store().next_id().await, 2);
}

// Signups are serialized through the store, so none of the concurrent writes is lost.
#[tokio::test]
async fn test_concurrent_signups_all_survive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.json");
    let (_, app) = test_app(&path).await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move { signup(&app, &format!("user{i}"), "pw").await.0 })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::CREATED);
    }

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let users = raw["users"].as_array().unwrap();
    assert_eq!(users.len(), 8);

    let mut ids: Vec<u64> = users.iter().map(|u| u["id"].as_u64().unwrap()).collect();
    ids.sort();
    assert_eq!(ids, (1..=8).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_memory_store_config() {
    let config = AppConfig::new(SECRET).with_store_path(":memory:");
    let state = build_state(&config).await.unwrap();
    let app = router(state);

    assert_eq!(signup(&app, "alice", "p1").await.0, StatusCode::CREATED);
    assert_eq!(login(&app, "alice", "p1").await.0, StatusCode::OK);
}
