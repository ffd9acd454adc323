//! Anti-forgery token store and middleware
//!
//! One token per principal key, valid for a fixed window after issuance.
//! Validation does not rotate the token, so several tabs sharing a key keep
//! working until the token is explicitly re-issued.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use common::SharedClock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::AppState;
use crate::audit::SecurityEvent;
use crate::error::SecurityError;
use crate::jwt::{constant_time_eq, random_token};
use crate::middleware::client_ip;
use crate::models::AuthUser;

/// Header carrying the token
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Alternative header name used by some HTTP clients
pub const XSRF_HEADER: &str = "x-xsrf-token";
/// Cookie the token is delivered in
pub const CSRF_COOKIE: &str = "XSRF-TOKEN";

const CSRF_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
struct CsrfTokenRecord {
    token: String,
    created_at: DateTime<Utc>,
}

/// CSRF token store
#[derive(Debug, Clone)]
pub struct CsrfTokenStore {
    ttl: Duration,
    clock: SharedClock,
    tokens: Arc<Mutex<HashMap<String, CsrfTokenRecord>>>,
}

impl CsrfTokenStore {
    /// Create a new token store
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            ttl,
            clock,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Issue a token for a key, replacing any previous one
    pub async fn issue(&self, principal_key: &str) -> String {
        let token = random_token(CSRF_TOKEN_BYTES);
        let record = CsrfTokenRecord {
            token: token.clone(),
            created_at: self.clock.now(),
        };

        self.tokens
            .lock()
            .await
            .insert(principal_key.to_string(), record);

        token
    }

    /// Check a presented token against the one issued for a key
    pub async fn validate(&self, principal_key: &str, presented: &str) -> bool {
        let now = self.clock.now();
        let mut tokens = self.tokens.lock().await;

        let Some(record) = tokens.get(principal_key) else {
            return false;
        };

        if now - record.created_at > self.ttl {
            tokens.remove(principal_key);
            debug!("CSRF token for {} expired", principal_key);
            return false;
        }

        constant_time_eq(record.token.as_bytes(), presented.as_bytes())
    }

    /// Remove every expired token
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut tokens = self.tokens.lock().await;
        let before = tokens.len();
        tokens.retain(|_, record| now - record.created_at <= self.ttl);
        before - tokens.len()
    }

    /// Token lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored tokens
    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    /// Whether the store holds no tokens
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Key a token is issued under: the principal when authenticated, else the IP
pub fn principal_key(user: Option<&AuthUser>, ip: &str) -> String {
    match user {
        Some(user) => user.principal.id.to_string(),
        None => format!("ip:{}", ip),
    }
}

/// Whether a request method can change state
pub fn is_state_changing(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Token presented in the request headers, if any
pub fn presented_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CSRF_HEADER)
        .or_else(|| headers.get(XSRF_HEADER))
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Reject state-changing requests without a matching CSRF token
///
/// Must run after the authentication middleware so the principal key can be
/// derived from the authenticated user.
pub async fn csrf_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, SecurityError> {
    if !state.config.enable_csrf_protection || !is_state_changing(req.method()) {
        return Ok(next.run(req).await);
    }

    let ip = client_ip(&req, state.config.trust_proxy_headers);
    let key = principal_key(req.extensions().get::<AuthUser>(), &ip);

    let valid = match presented_token(req.headers()) {
        Some(token) => state.coordinator.validate_csrf(&key, token).await,
        None => false,
    };

    if !valid {
        state.coordinator.audit(SecurityEvent::CsrfViolation {
            principal_key: key,
            ip,
            path: req.uri().path().to_string(),
        });
        return Err(SecurityError::CsrfViolation);
    }

    Ok(next.run(req).await)
}
