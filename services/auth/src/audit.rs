//! Security audit events
//!
//! Emission is synchronous and infallible: a sink must never block or fail the
//! request that produced the event.

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use tracing::{info, warn};
use uuid::Uuid;

/// Security-relevant outcome of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    LoginSucceeded {
        principal_id: Uuid,
        ip: String,
    },
    LoginFailed {
        identifier: String,
        ip: String,
        attempts: u32,
    },
    AccountLocked {
        identifier: String,
        ip: String,
        locked_until: DateTime<Utc>,
    },
    LockedLoginRejected {
        identifier: String,
        ip: String,
    },
    RefreshRejected {
        reason: String,
    },
    SessionExpired {
        principal_id: Uuid,
    },
    LoggedOut {
        principal_id: Uuid,
    },
    CsrfViolation {
        principal_key: String,
        ip: String,
        path: String,
    },
    PasswordChanged {
        principal_id: Uuid,
    },
    PasswordRejected {
        principal_id: Uuid,
        reason: String,
    },
    PrincipalBanned {
        principal_id: Uuid,
        by: Uuid,
        sessions_revoked: usize,
    },
    RoleChanged {
        principal_id: Uuid,
        by: Uuid,
        role: String,
    },
}

impl SecurityEvent {
    /// Stable machine-readable event name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LoginSucceeded { .. } => "login_succeeded",
            Self::LoginFailed { .. } => "login_failed",
            Self::AccountLocked { .. } => "account_locked",
            Self::LockedLoginRejected { .. } => "locked_login_rejected",
            Self::RefreshRejected { .. } => "refresh_rejected",
            Self::SessionExpired { .. } => "session_expired",
            Self::LoggedOut { .. } => "logged_out",
            Self::CsrfViolation { .. } => "csrf_violation",
            Self::PasswordChanged { .. } => "password_changed",
            Self::PasswordRejected { .. } => "password_rejected",
            Self::PrincipalBanned { .. } => "principal_banned",
            Self::RoleChanged { .. } => "role_changed",
        }
    }

    /// Whether the event signals a failed or hostile request
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            Self::LoginSucceeded { .. }
                | Self::LoggedOut { .. }
                | Self::PasswordChanged { .. }
                | Self::PrincipalBanned { .. }
                | Self::RoleChanged { .. }
        )
    }
}

/// Receiver of security events
pub trait AuditSink: Send + Sync + Debug {
    fn record(&self, event: SecurityEvent);
}

/// Writes security events to the `security_audit` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: SecurityEvent) {
        let kind = event.kind();
        if event.is_failure() {
            warn!(target: "security_audit", event = kind, details = ?event);
        } else {
            info!(target: "security_audit", event = kind, details = ?event);
        }
    }
}
