//! Integration tests for the REST endpoints

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use blogwire::config::ServerConfig;
use blogwire::types::Role;
use blogwire::AppState;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    state: AppState,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let config = ServerConfig {
            token_secret: "test-secret".to_string(),
            ..ServerConfig::default()
        };
        let state = AppState::new(config).unwrap();
        let router = blogwire::app(state.clone());
        Self { state, router }
    }

    fn token(&self, role: Role) -> String {
        self.state.tokens.issue("alice", role, Duration::from_secs(60))
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/api/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["onlineCount"], 0);
}

#[tokio::test]
async fn test_online_count_is_public() {
    let app = TestApp::new();
    let (status, body) = app
        .call(Method::GET, "/api/notifications/online-count", None, None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["onlineCount"], 0);
    assert!(body["data"]["timestamp"].is_i64());
}

#[tokio::test]
async fn test_admin_routes_require_admin_token() {
    let app = TestApp::new();
    let user = app.token(Role::User);

    let (status, body) = app
        .call(Method::GET, "/api/admin/notifications/unread-count", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);

    let (status, _) = app
        .call(Method::GET, "/api/admin/notifications/unread-count", Some("garbage"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::GET, "/api/admin/notifications/unread-count", Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_broadcast_then_list_and_mark_read() {
    let app = TestApp::new();
    let admin = app.token(Role::Admin);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/admin/notifications/broadcast",
            Some(&admin),
            Some(json!({ "content": "Maintenance at noon" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["type"], "SYSTEM");
    assert_eq!(body["data"]["title"], "System announcement");
    assert_eq!(body["data"]["senderName"], "alice");
    let id = body["data"]["id"].as_i64().unwrap();

    let (_, body) = app
        .call(Method::GET, "/api/admin/notifications/unread-count", Some(&admin), None)
        .await;
    assert_eq!(body["data"]["unreadCount"], 1);

    let (status, body) = app
        .call(Method::GET, "/api/admin/notifications?page=0&size=10", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalElements"], 1);
    assert_eq!(body["data"]["content"][0]["id"], id);

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/admin/notifications/{}/read", id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["affected"], 1);

    let (_, body) = app
        .call(Method::PUT, "/api/admin/notifications/read-all", Some(&admin), None)
        .await;
    assert_eq!(body["data"]["success"], true);
    assert_eq!(body["data"]["affected"], 0);
}

#[tokio::test]
async fn test_broadcast_rejects_blank_content() {
    let app = TestApp::new();
    let admin = app.token(Role::Admin);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/admin/notifications/broadcast",
            Some(&admin),
            Some(json!({ "title": "Hi", "content": "   " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_mark_unknown_notification_read() {
    let app = TestApp::new();
    let admin = app.token(Role::Admin);

    let (status, body) = app
        .call(Method::PUT, "/api/admin/notifications/999/read", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_ws_stats() {
    let app = TestApp::new();
    let admin = app.token(Role::Admin);
    app.state.notifications.notify_comment("bob", 1, "Hello", "First!");

    let (status, body) = app
        .call(Method::GET, "/api/admin/notifications/ws-stats", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalNotifications"], 1);
    assert_eq!(body["data"]["status"], "running");
    assert_eq!(body["data"]["onlineCount"], 0);
}
