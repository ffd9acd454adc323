//! End-to-end tests driving the router in-process

use std::sync::Arc;

use auth::{
    AppState,
    audit::TracingAuditSink,
    build_app,
    config::SecurityConfig,
    models::{NewUser, User},
    password_policy::hash_password,
    repositories::{InMemoryUserRepository, UserRepository},
};
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use chrono::Duration;
use common::ManualClock;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

const PASSWORD: &str = "Correct#Horse9";

struct TestApp {
    app: Router,
    clock: ManualClock,
    users: Arc<InMemoryUserRepository>,
    state: AppState,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(SecurityConfig {
            jwt_secret: "integration-test-secret".to_string(),
            ..SecurityConfig::default()
        })
    }

    fn with_config(config: SecurityConfig) -> Self {
        let clock = ManualClock::starting_now();
        let users = Arc::new(InMemoryUserRepository::new());
        let state = AppState::new(
            config,
            users.clone(),
            Arc::new(TracingAuditSink),
            Arc::new(clock.clone()),
        );
        Self {
            app: build_app(state.clone()),
            clock,
            users,
            state,
        }
    }

    async fn add_user(&self, email: &str, role: &str) -> User {
        self.users
            .create(&NewUser {
                email: email.to_string(),
                password_hash: Some(hash_password(PASSWORD).unwrap()),
                role: role.to_string(),
            })
            .await
            .unwrap()
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, HeaderMap, Value) {
        self.send(post_json(
            "/auth/login",
            json!({ "email": email, "password": password }),
        ))
        .await
    }

    /// Log in and fetch a CSRF token for the session
    async fn session(&self, email: &str) -> (String, String, String) {
        let (status, _, body) = self.login(email, PASSWORD).await;
        assert_eq!(status, StatusCode::OK);
        let access = body["accessToken"].as_str().unwrap().to_string();
        let refresh = body["refreshToken"].as_str().unwrap().to_string();

        let (status, _, body) = self
            .send(
                Request::get("/auth/csrf-token")
                    .header(header::AUTHORIZATION, format!("Bearer {}", access))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let csrf = body["csrfToken"].as_str().unwrap().to_string();

        (access, refresh, csrf)
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed_post(uri: &str, access: &str, csrf: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", access));
    if let Some(csrf) = csrf {
        builder = builder.header("x-csrf-token", csrf);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, _, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_lockout_after_five_failures_then_recovery() {
    let app = TestApp::new();
    app.add_user("alice@example.com", "student").await;

    for remaining in (1..=4).rev() {
        let (status, _, body) = app.login("alice@example.com", "wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["remainingAttempts"], remaining);
    }

    let (status, _, body) = app.login("alice@example.com", "wrong").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["locked"], true);
    assert!(body["lockedUntil"].is_string());

    let (status, _, body) = app.login("alice@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "ACCOUNT_LOCKED");

    app.clock.advance(Duration::minutes(15));

    let (status, _, body) = app.login("alice@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert!(
        app.state
            .coordinator
            .lockout()
            .record("alice@example.com")
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_login_sets_http_only_cookies() {
    let app = TestApp::new();
    app.add_user("alice@example.com", "student").await;

    let (status, headers, body) = app.login("alice@example.com", PASSWORD).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["accessToken"].is_string());
    assert!(body["refreshToken"].is_string());
    assert!(body["user"]["lastLoginAt"].is_string());
    assert!(body["user"].get("passwordHash").is_none());

    let cookies = set_cookies(&headers);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().any(|c| c.starts_with("accessToken=")
        && c.contains("HttpOnly")
        && c.contains("Max-Age=900")));
    assert!(cookies.iter().any(|c| c.starts_with("refreshToken=")
        && c.contains("HttpOnly")
        && c.contains("Max-Age=2592000")));
}

#[tokio::test]
async fn test_protected_route_accepts_bearer_or_cookie() {
    let app = TestApp::new();
    app.add_user("alice@example.com", "student").await;
    let (access, _, _) = app.session("alice@example.com").await;

    let (status, _, body) = app
        .send(
            Request::get("/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", access))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "alice@example.com");

    let (status, _, _) = app
        .send(
            Request::get("/auth/me")
                .header(header::COOKIE, format!("accessToken={}", access))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = app
        .send(Request::get("/auth/me").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TOKEN_INVALID");
}

#[tokio::test]
async fn test_idle_session_is_reported_as_expired() {
    let app = TestApp::with_config(SecurityConfig {
        jwt_secret: "integration-test-secret".to_string(),
        session_idle_timeout: Duration::minutes(5),
        ..SecurityConfig::default()
    });
    app.add_user("alice@example.com", "student").await;
    let (access, _, _) = app.session("alice@example.com").await;

    app.clock.advance(Duration::minutes(6));

    let (status, _, body) = app
        .send(
            Request::get("/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", access))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "SESSION_EXPIRED");
}

#[tokio::test]
async fn test_refresh_from_body_and_cookie() {
    let app = TestApp::new();
    app.add_user("alice@example.com", "student").await;
    let (_, refresh, _) = app.session("alice@example.com").await;

    let (status, headers, body) = app
        .send(post_json("/auth/refresh", json!({ "refreshToken": refresh })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["accessToken"].is_string());
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert!(
        set_cookies(&headers)
            .iter()
            .any(|c| c.starts_with("accessToken="))
    );

    let (status, _, _) = app
        .send(
            Request::post("/auth/refresh")
                .header(header::COOKIE, format!("refreshToken={}", refresh))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = app
        .send(post_json("/auth/refresh", json!({ "refreshToken": "bogus" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_state_changing_request_requires_csrf_token() {
    let app = TestApp::new();
    app.add_user("alice@example.com", "student").await;
    let (access, _, csrf) = app.session("alice@example.com").await;

    let (status, _, body) = app
        .send(authed_post("/auth/logout", &access, None, json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "CSRF_VIOLATION");

    let (status, _, _) = app
        .send(authed_post("/auth/logout", &access, Some("wrong"), json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app
        .send(authed_post("/auth/logout", &access, Some(&csrf), json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_csrf_disabled_lets_requests_through() {
    let app = TestApp::with_config(SecurityConfig {
        jwt_secret: "integration-test-secret".to_string(),
        enable_csrf_protection: false,
        ..SecurityConfig::default()
    });
    app.add_user("alice@example.com", "student").await;
    let (status, _, body) = app.login("alice@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    let access = body["accessToken"].as_str().unwrap();

    let (status, _, _) = app
        .send(authed_post("/auth/logout", access, None, json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_clears_cookies_and_revokes_refresh() {
    let app = TestApp::new();
    app.add_user("alice@example.com", "student").await;
    let (access, refresh, csrf) = app.session("alice@example.com").await;

    let (status, headers, body) = app
        .send(authed_post("/auth/logout", &access, Some(&csrf), json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out successfully");
    assert!(
        set_cookies(&headers)
            .iter()
            .all(|c| c.contains("Max-Age=0"))
    );

    let (status, _, _) = app
        .send(post_json("/auth/refresh", json!({ "refreshToken": refresh })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app
        .send(
            Request::get("/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", access))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password_stages() {
    let app = TestApp::new();
    app.add_user("alice@example.com", "student").await;
    let (access, _, csrf) = app.session("alice@example.com").await;

    let (status, _, body) = app
        .send(authed_post(
            "/auth/change-password",
            &access,
            Some(&csrf),
            json!({ "oldPassword": "wrong", "password": "New#Password1" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_CURRENT_PASSWORD");

    let (status, _, body) = app
        .send(authed_post(
            "/auth/change-password",
            &access,
            Some(&csrf),
            json!({ "oldPassword": PASSWORD, "password": "password" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body["validationErrors"].as_array().unwrap().is_empty());
    assert!(body["passwordStrength"]["score"].is_number());
    assert!(body["passwordStrength"]["label"].is_string());

    let (status, _, body) = app
        .send(authed_post(
            "/auth/change-password",
            &access,
            Some(&csrf),
            json!({ "oldPassword": PASSWORD, "password": PASSWORD }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PASSWORD_REUSED");

    let (status, _, _) = app
        .send(authed_post(
            "/auth/change-password",
            &access,
            Some(&csrf),
            json!({ "oldPassword": PASSWORD, "password": "New#Password1" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = app.login("alice@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = app.login("alice@example.com", "New#Password1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_ban() {
    let app = TestApp::new();
    app.add_user("admin@example.com", "admin").await;
    let alice = app.add_user("alice@example.com", "student").await;
    let (admin_access, _, admin_csrf) = app.session("admin@example.com").await;
    let (alice_access, alice_refresh, alice_csrf) = app.session("alice@example.com").await;

    let (status, _, body) = app
        .send(authed_post(
            &format!("/auth/admin/users/{}/ban", alice.id),
            &alice_access,
            Some(&alice_csrf),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _, body) = app
        .send(authed_post(
            &format!("/auth/admin/users/{}/ban", alice.id),
            &admin_access,
            Some(&admin_csrf),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionsRevoked"], 1);

    let (status, _, _) = app
        .send(post_json(
            "/auth/refresh",
            json!({ "refreshToken": alice_refresh }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app
        .send(authed_post(
            &format!("/auth/admin/users/{}/ban", uuid::Uuid::new_v4()),
            &admin_access,
            Some(&admin_csrf),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_json_is_a_bad_request() {
    let app = TestApp::new();

    let (status, _, body) = app
        .send(post_json("/auth/login", json!({ "email": "a@example.com" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert!(body["error"].is_string());

    let (status, _, body) = app
        .send(
            Request::post("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_role_change_applies_on_refresh() {
    let app = TestApp::new();
    app.add_user("admin@example.com", "admin").await;
    let alice = app.add_user("alice@example.com", "student").await;
    let (admin_access, _, admin_csrf) = app.session("admin@example.com").await;
    let (_, alice_refresh, _) = app.session("alice@example.com").await;

    let (status, _, _) = app
        .send(
            Request::put(format!("/auth/admin/users/{}/role", alice.id))
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {}", admin_access))
                .header("x-csrf-token", &admin_csrf)
                .body(Body::from(json!({ "role": "teacher" }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = app
        .send(post_json(
            "/auth/refresh",
            json!({ "refreshToken": alice_refresh }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], "teacher");

    let claims = app
        .state
        .coordinator
        .sessions()
        .jwt()
        .verify_access(body["accessToken"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.role, "teacher");
}

fn anonymous_login(forwarded_for: &str) -> Request<Body> {
    Request::post("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", forwarded_for)
        .body(Body::from(json!({ "password": "wrong" }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_forwarded_for_ignored_without_trusted_proxy() {
    let app = TestApp::with_config(SecurityConfig {
        jwt_secret: "integration-test-secret".to_string(),
        trust_proxy_headers: false,
        ..SecurityConfig::default()
    });

    // Rotating the header does not spread failures over fresh identifiers
    for n in 1..=4 {
        let (status, _, _) = app
            .send(anonymous_login(&format!("198.51.100.{}", n)))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _, body) = app.send(anonymous_login("198.51.100.99")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "ACCOUNT_LOCKED");
    assert!(
        app.state
            .coordinator
            .lockout()
            .record("198.51.100.99")
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_forwarded_for_keys_lockout_behind_trusted_proxy() {
    let app = TestApp::new();

    for n in 1..=5 {
        let (status, _, _) = app
            .send(anonymous_login(&format!("198.51.100.{}", n)))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let record = app
        .state
        .coordinator
        .lockout()
        .record("198.51.100.5")
        .await
        .unwrap();
    assert_eq!(record.attempts, 1);
}
