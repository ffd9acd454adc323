//! Custom error types for the authentication service

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::password_policy::PasswordStrength;

/// Failures surfaced by the security flows
///
/// Every variant renders as `{ "error": ..., "code": ..., ...context }`.
#[derive(Error, Debug)]
pub enum SecurityError {
    /// Wrong email or password
    #[error("Invalid credentials")]
    AuthenticationFailure { remaining_attempts: u32 },

    /// Too many failed logins for this identifier
    #[error("Account temporarily locked due to too many failed login attempts")]
    AccountLocked { locked_until: Option<DateTime<Utc>> },

    /// Malformed, expired or mismatched token, or a session that no longer exists
    #[error("Invalid or expired token")]
    TokenInvalid,

    /// Session dropped after inactivity
    #[error("Session expired due to inactivity")]
    SessionExpired,

    /// Missing or mismatched anti-forgery token
    #[error("Invalid or missing CSRF token")]
    CsrfViolation,

    /// New password fails the strength policy
    #[error("Password does not meet security requirements")]
    PolicyViolation {
        errors: Vec<String>,
        strength: PasswordStrength,
    },

    /// New password matches a recent one
    #[error("Password has been used recently, please choose a different password")]
    PasswordReused,

    /// Current password does not match during a password change
    #[error("Current password is incorrect")]
    InvalidCurrentPassword,

    /// Authenticated but not allowed
    #[error("Insufficient permissions")]
    Forbidden,

    /// Referenced resource does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed request
    #[error("{0}")]
    BadRequest(String),

    /// Anything else; details are logged, never returned
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl SecurityError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            SecurityError::AuthenticationFailure { .. } => "AUTHENTICATION_FAILED",
            SecurityError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            SecurityError::TokenInvalid => "TOKEN_INVALID",
            SecurityError::SessionExpired => "SESSION_EXPIRED",
            SecurityError::CsrfViolation => "CSRF_VIOLATION",
            SecurityError::PolicyViolation { .. } => "PASSWORD_POLICY_VIOLATION",
            SecurityError::PasswordReused => "PASSWORD_REUSED",
            SecurityError::InvalidCurrentPassword => "INVALID_CURRENT_PASSWORD",
            SecurityError::Forbidden => "FORBIDDEN",
            SecurityError::NotFound(_) => "NOT_FOUND",
            SecurityError::BadRequest(_) => "BAD_REQUEST",
            SecurityError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status of the response
    pub fn status(&self) -> StatusCode {
        match self {
            SecurityError::AuthenticationFailure { .. }
            | SecurityError::TokenInvalid
            | SecurityError::SessionExpired
            | SecurityError::InvalidCurrentPassword => StatusCode::UNAUTHORIZED,
            SecurityError::AccountLocked { .. }
            | SecurityError::CsrfViolation
            | SecurityError::Forbidden => StatusCode::FORBIDDEN,
            SecurityError::PolicyViolation { .. }
            | SecurityError::PasswordReused
            | SecurityError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SecurityError::NotFound(_) => StatusCode::NOT_FOUND,
            SecurityError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });

        match &self {
            SecurityError::AuthenticationFailure { remaining_attempts } => {
                body["remainingAttempts"] = json!(remaining_attempts);
            }
            SecurityError::AccountLocked { locked_until } => {
                body["locked"] = json!(true);
                if let Some(until) = locked_until {
                    body["lockedUntil"] = json!(until);
                }
            }
            SecurityError::PolicyViolation { errors, strength } => {
                body["validationErrors"] = json!(errors);
                body["passwordStrength"] = json!({
                    "score": strength.score,
                    "label": strength.label(),
                });
            }
            SecurityError::Internal(e) => {
                error!("Internal error: {:#}", e);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for SecurityError {
    fn from(rejection: JsonRejection) -> Self {
        SecurityError::BadRequest(rejection.body_text())
    }
}

/// Type alias for security results
pub type SecurityResult<T> = Result<T, SecurityError>;
