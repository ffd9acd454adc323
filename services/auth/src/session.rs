//! In-memory session store
//!
//! Sessions bind a login to its refresh token and track activity for the idle
//! timeout. Expiry is evaluated lazily on every read; the background sweep only
//! bounds memory for sessions that are never read again.

use chrono::Duration;
use common::SharedClock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::jwt::{JwtService, TokenError, constant_time_eq, hash_token, random_token};
use crate::models::{IssuedSession, Principal, RefreshedSession, Session, SessionStatus};

/// Number of random bytes in a session id
const SESSION_ID_BYTES: usize = 32;

/// Session store failures
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad signature, expired, not a refresh token, unknown session, hash
    /// mismatch or idle session
    #[error("invalid refresh token")]
    InvalidRefresh,

    /// Token signing failed
    #[error("failed to sign session tokens: {0}")]
    Signing(#[source] TokenError),
}

/// Session store
#[derive(Clone)]
pub struct SessionStore {
    jwt: JwtService,
    idle_timeout: Duration,
    clock: SharedClock,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionStore {
    /// Create a new session store
    pub fn new(jwt: JwtService, idle_timeout: Duration, clock: SharedClock) -> Self {
        Self {
            jwt,
            idle_timeout,
            clock,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open a session for a principal and mint its token pair
    pub async fn create(&self, principal: &Principal) -> Result<IssuedSession, SessionError> {
        let session_id = random_token(SESSION_ID_BYTES);

        let access_token = self
            .jwt
            .generate_access_token(principal, &session_id)
            .map_err(SessionError::Signing)?;
        let refresh_token = self
            .jwt
            .generate_refresh_token(principal, &session_id)
            .map_err(SessionError::Signing)?;

        let now = self.clock.now();
        let session = Session {
            session_id: session_id.clone(),
            principal_id: principal.id,
            email: principal.email.clone(),
            role: principal.role.clone(),
            created_at: now,
            last_activity_at: now,
            refresh_token_hash: hash_token(&refresh_token),
        };

        self.sessions
            .lock()
            .await
            .insert(session_id.clone(), session);

        info!("Created session for principal: {}", principal.id);

        Ok(IssuedSession {
            access_token,
            refresh_token,
            session_id,
        })
    }

    /// Record activity on a session
    pub async fn touch(&self, session_id: &str) {
        let now = self.clock.now();
        if let Some(session) = self.sessions.lock().await.get_mut(session_id) {
            session.last_activity_at = now;
        }
    }

    /// Look a session up, dropping it if it has been idle too long
    pub async fn status(&self, session_id: &str) -> SessionStatus {
        let mut sessions = self.sessions.lock().await;
        self.status_locked(&mut sessions, session_id)
    }

    /// Whether the session exists and is within the idle timeout
    pub async fn is_valid(&self, session_id: &str) -> bool {
        self.status(session_id).await == SessionStatus::Active
    }

    fn status_locked(
        &self,
        sessions: &mut HashMap<String, Session>,
        session_id: &str,
    ) -> SessionStatus {
        let Some(session) = sessions.get(session_id) else {
            return SessionStatus::Missing;
        };

        if self.clock.now() - session.last_activity_at > self.idle_timeout {
            sessions.remove(session_id);
            debug!("Session expired after inactivity");
            return SessionStatus::IdleExpired;
        }

        SessionStatus::Active
    }

    /// Exchange a refresh token for a new access token
    ///
    /// The new token carries the role and email stored on the session, not
    /// the ones embedded in the presented refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedSession, SessionError> {
        self.refresh_with(refresh_token, None).await
    }

    /// Exchange a refresh token, minting for the principal as it is now
    ///
    /// `current` replaces the role and email stored on the session, so a role
    /// change made since login takes effect on the next refresh. It must be
    /// the principal the session belongs to.
    pub async fn refresh_as(
        &self,
        refresh_token: &str,
        current: &Principal,
    ) -> Result<RefreshedSession, SessionError> {
        self.refresh_with(refresh_token, Some(current)).await
    }

    async fn refresh_with(
        &self,
        refresh_token: &str,
        current: Option<&Principal>,
    ) -> Result<RefreshedSession, SessionError> {
        let claims = self.jwt.verify_refresh(refresh_token).map_err(|e| {
            debug!("Refresh token rejected: {}", e);
            SessionError::InvalidRefresh
        })?;

        let mut sessions = self.sessions.lock().await;

        if self.status_locked(&mut sessions, &claims.sid) != SessionStatus::Active {
            return Err(SessionError::InvalidRefresh);
        }

        let now = self.clock.now();
        let session = sessions
            .get_mut(&claims.sid)
            .ok_or(SessionError::InvalidRefresh)?;

        let presented = hash_token(refresh_token);
        if !constant_time_eq(presented.as_bytes(), session.refresh_token_hash.as_bytes()) {
            warn!(
                "Refresh token does not match session of principal: {}",
                session.principal_id
            );
            return Err(SessionError::InvalidRefresh);
        }

        if let Some(current) = current {
            if current.id != session.principal_id {
                warn!(
                    "Refresh for session of {} attempted as {}",
                    session.principal_id, current.id
                );
                return Err(SessionError::InvalidRefresh);
            }
            session.email = current.email.clone();
            session.role = current.role.clone();
        }

        session.last_activity_at = now;
        let principal = session.principal();

        let access_token = self
            .jwt
            .generate_access_token(&principal, &session.session_id)
            .map_err(SessionError::Signing)?;

        Ok(RefreshedSession {
            access_token,
            principal,
        })
    }

    /// Delete a session
    pub async fn invalidate(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_id);
        if let Some(session) = &removed {
            info!("Invalidated session for principal: {}", session.principal_id);
        }
        removed.is_some()
    }

    /// Delete every session of a principal, returning how many were removed
    pub async fn invalidate_principal(&self, principal_id: Uuid) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.principal_id != principal_id);
        let removed = before - sessions.len();

        info!(
            "Invalidated {} session(s) for principal: {}",
            removed, principal_id
        );
        removed
    }

    /// Snapshot of a session, if it is still active
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        match self.status_locked(&mut sessions, session_id) {
            SessionStatus::Active => sessions.get(session_id).cloned(),
            _ => None,
        }
    }

    /// Remove every idle session
    pub async fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| now - session.last_activity_at <= self.idle_timeout);
        before - sessions.len()
    }

    /// Number of stored sessions, including idle ones not yet swept
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether the store holds no sessions
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The token service used to sign session tokens
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }
}
