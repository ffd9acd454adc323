//! Middleware for access token validation and authentication

use axum::{
    async_trait,
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{Extensions, HeaderMap, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, Cookie, HeaderMapExt, authorization::Bearer};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::AppState;
use crate::error::SecurityError;
use crate::models::AuthUser;

/// Cookie carrying the access token
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
/// Cookie carrying the refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Client address: first `X-Forwarded-For` entry, else the socket peer
///
/// The header is only read when `trust_forwarded` is set, that is when a
/// reverse proxy in front of the service overwrites it.
pub fn client_ip<B>(req: &Request<B>, trust_forwarded: bool) -> String {
    ip_from_parts(req.headers(), req.extensions(), trust_forwarded)
}

fn ip_from_parts(headers: &HeaderMap, extensions: &Extensions, trust_forwarded: bool) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .filter(|_| trust_forwarded)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extractor for the client address of a request
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

#[async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(ip_from_parts(
            &parts.headers,
            &parts.extensions,
            state.config.trust_proxy_headers,
        )))
    }
}

/// Value of a named cookie
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .typed_get::<Cookie>()
        .and_then(|cookie| cookie.get(name).map(str::to_string))
        .filter(|value| !value.is_empty())
}

/// Access token from the `Authorization: Bearer` header or the access cookie
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|bearer| bearer.token().to_string())
        .or_else(|| cookie_value(headers, ACCESS_TOKEN_COOKIE))
}

/// Resolve the caller if the request carries a live access token
pub async fn optional_user(state: &AppState, headers: &HeaderMap) -> Option<AuthUser> {
    let token = access_token(headers)?;
    state.coordinator.authenticate(&token).await.ok()
}

/// Reject requests without a live session and attach the [`AuthUser`]
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, SecurityError> {
    let token = access_token(req.headers()).ok_or(SecurityError::TokenInvalid)?;

    let user = state.coordinator.authenticate(&token).await?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req, true), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_ignores_forwarded_header_when_untrusted() {
        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req, false), "unknown");

        let addr: SocketAddr = "192.0.2.4:5555".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&req, false), "192.0.2.4");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer_then_unknown() {
        let mut req = Request::builder().body(()).unwrap();
        assert_eq!(client_ip(&req, true), "unknown");

        let addr: SocketAddr = "192.0.2.4:5555".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&req, true), "192.0.2.4");
    }

    #[test]
    fn test_access_token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(access_token(&headers), None);

        headers.insert("cookie", "theme=dark; accessToken=from-cookie".parse().unwrap());
        assert_eq!(access_token(&headers).as_deref(), Some("from-cookie"));

        headers.insert("authorization", "Bearer from-header".parse().unwrap());
        assert_eq!(access_token(&headers).as_deref(), Some("from-header"));
    }
}
