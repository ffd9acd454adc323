//! Authentication service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, header::SET_COOKIE},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post, put},
};
use axum_extra::extract::WithRejection;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::AppState;
use crate::coordinator::LoginAttempt;
use crate::csrf::{CSRF_COOKIE, csrf_middleware, principal_key};
use crate::error::{SecurityError, SecurityResult};
use crate::middleware::{
    ACCESS_TOKEN_COOKIE, ClientIp, REFRESH_TOKEN_COOKIE, auth_middleware, cookie_value,
    optional_user,
};
use crate::models::{AuthUser, UserView};

/// Request for user login
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: String,
    pub role: Option<String>,
}

/// Response for user login
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: UserView,
}

/// Request for token refresh
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: Option<String>,
}

/// Response for token refresh
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub user: UserView,
}

/// Response carrying an anti-forgery token
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
    pub expires_in: i64,
}

/// Request for a password change or a first password
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: Option<String>,
    pub password: String,
}

/// Request for a role change
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRoleRequest {
    pub role: String,
}

/// Response for a ban
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanResponse {
    pub message: String,
    pub sessions_revoked: usize,
}

/// Create the router for the authentication service
pub fn create_router(state: AppState) -> Router {
    // Layers run bottom-up: authentication first, then CSRF
    let protected = Router::new()
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/auth/change-password", post(change_password))
        .route("/auth/set-password", post(change_password))
        .route("/auth/admin/users/:id/ban", post(ban_user))
        .route("/auth/admin/users/:id/role", put(set_user_role))
        .route_layer(from_fn_with_state(state.clone(), csrf_middleware))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh_token))
        .route("/auth/csrf-token", get(csrf_token))
        .merge(protected)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "auth-service"
    }))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, SecurityError>,
) -> SecurityResult<impl IntoResponse> {
    let outcome = state
        .coordinator
        .login(LoginAttempt {
            email: payload.email,
            password: payload.password,
            role: payload.role,
            ip,
        })
        .await?;

    let access_ttl = state.config.access_token_ttl;
    let mut headers = HeaderMap::new();
    set_cookie(
        &mut headers,
        token_cookie(ACCESS_TOKEN_COOKIE, &outcome.session.access_token, access_ttl),
    )?;
    set_cookie(
        &mut headers,
        token_cookie(
            REFRESH_TOKEN_COOKIE,
            &outcome.session.refresh_token,
            state.config.refresh_token_ttl,
        ),
    )?;

    let response = LoginResponse {
        access_token: outcome.session.access_token,
        refresh_token: outcome.session.refresh_token,
        expires_in: access_ttl.num_seconds(),
        user: UserView::from(&outcome.user),
    };

    Ok((headers, Json(response)))
}

/// Refresh token endpoint
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<RefreshTokenRequest>>,
) -> SecurityResult<impl IntoResponse> {
    let token = payload
        .and_then(|Json(body)| body.refresh_token)
        .filter(|token| !token.is_empty())
        .or_else(|| cookie_value(&headers, REFRESH_TOKEN_COOKIE))
        .ok_or(SecurityError::TokenInvalid)?;

    let refreshed = state.coordinator.refresh(&token).await?;

    let access_ttl = state.config.access_token_ttl;
    let mut response_headers = HeaderMap::new();
    set_cookie(
        &mut response_headers,
        token_cookie(ACCESS_TOKEN_COOKIE, &refreshed.access_token, access_ttl),
    )?;

    let response = RefreshTokenResponse {
        access_token: refreshed.access_token,
        expires_in: access_ttl.num_seconds(),
        user: UserView::from(&refreshed.principal),
    };

    Ok((response_headers, Json(response)))
}

/// Anti-forgery token endpoint
pub async fn csrf_token(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
) -> SecurityResult<impl IntoResponse> {
    let user = optional_user(&state, &headers).await;
    let key = principal_key(user.as_ref(), &ip);
    let token = state.coordinator.issue_csrf(&key).await;

    let ttl = state.config.csrf_token_ttl();
    let mut response_headers = HeaderMap::new();
    set_cookie(
        &mut response_headers,
        format!(
            "{}={}; Path=/; Max-Age={}; SameSite=Strict",
            CSRF_COOKIE,
            token,
            ttl.num_seconds()
        ),
    )?;

    let response = CsrfTokenResponse {
        csrf_token: token,
        expires_in: ttl.num_seconds(),
    };

    Ok((response_headers, Json(response)))
}

/// Current user endpoint
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> SecurityResult<impl IntoResponse> {
    let record = state.coordinator.current_user(&user).await?;

    Ok(Json(serde_json::json!({ "user": UserView::from(&record) })))
}

/// Logout endpoint
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> SecurityResult<impl IntoResponse> {
    info!("Logout request for user {}", user.principal.id);

    state.coordinator.logout(&user).await;

    let mut headers = HeaderMap::new();
    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, CSRF_COOKIE] {
        set_cookie(&mut headers, clear_cookie(name))?;
    }

    Ok((
        headers,
        Json(serde_json::json!({"message": "Logged out successfully"})),
    ))
}

/// Password change endpoint, also used to set a first password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Json(payload), _): WithRejection<Json<ChangePasswordRequest>, SecurityError>,
) -> SecurityResult<impl IntoResponse> {
    state
        .coordinator
        .change_password(
            user.principal.id,
            payload.old_password.as_deref(),
            &payload.password,
        )
        .await?;

    Ok(Json(
        serde_json::json!({"message": "Password updated successfully"}),
    ))
}

/// Disable a user and revoke its sessions
pub async fn ban_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(target): Path<Uuid>,
) -> SecurityResult<impl IntoResponse> {
    let sessions_revoked = state.coordinator.ban(&user, target).await?;

    Ok(Json(BanResponse {
        message: "User banned".to_string(),
        sessions_revoked,
    }))
}

/// Change the role of a user; open sessions see it on their next refresh
pub async fn set_user_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(target): Path<Uuid>,
    WithRejection(Json(payload), _): WithRejection<Json<SetRoleRequest>, SecurityError>,
) -> SecurityResult<impl IntoResponse> {
    state
        .coordinator
        .set_role(&user, target, &payload.role)
        .await?;

    Ok(Json(serde_json::json!({"message": "Role updated"})))
}

fn token_cookie(name: &str, value: &str, max_age: Duration) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Strict",
        name,
        value,
        max_age.num_seconds()
    )
}

fn clear_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; Path=/; Max-Age=0; SameSite=Strict", name)
}

fn set_cookie(headers: &mut HeaderMap, cookie: String) -> SecurityResult<()> {
    let value = HeaderValue::from_str(&cookie)
        .map_err(|e| SecurityError::Internal(anyhow::anyhow!("invalid cookie header: {}", e)))?;
    headers.append(SET_COOKIE, value);
    Ok(())
}
