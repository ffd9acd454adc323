//! Session model and related functionality

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Principal;

/// Server-side record of a login
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub principal_id: Uuid,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// SHA-256 of the refresh token issued with this session
    #[serde(skip)]
    pub refresh_token_hash: String,
}

impl Session {
    /// The principal as recorded when the session was last updated
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.principal_id,
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

/// Result of a lazy session lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Present and within the idle timeout
    Active,
    /// Was present but idle for too long; removed by the lookup
    IdleExpired,
    /// Never existed, logged out or swept
    Missing,
}

/// Tokens minted for a fresh session
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
}

/// Outcome of a successful refresh
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub access_token: String,
    pub principal: Principal,
}

/// Principal attached to a request by the authentication middleware
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Principal,
    pub session_id: String,
}
