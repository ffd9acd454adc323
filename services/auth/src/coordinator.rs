//! Login, refresh, logout and password-change flows
//!
//! The coordinator owns the four security stores and the principal
//! repository. HTTP handlers only translate requests into calls on it.

use std::sync::Arc;

use common::SharedClock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditSink, SecurityEvent};
use crate::config::SecurityConfig;
use crate::csrf::CsrfTokenStore;
use crate::error::{SecurityError, SecurityResult};
use crate::jwt::JwtService;
use crate::lockout::{LockoutConfig, LockoutTracker, lockout_identifier};
use crate::models::{AuthUser, IssuedSession, Principal, RefreshedSession, SessionStatus, User};
use crate::password_policy::{
    PasswordPolicy, PasswordStrength, check_reuse, hash_password, record_new_password,
    verify_password,
};
use crate::repositories::UserRepository;
use crate::session::{SessionError, SessionStore};

/// Role allowed to ban other principals
pub const ADMIN_ROLE: &str = "admin";

/// Credentials submitted to the login flow
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub email: Option<String>,
    pub password: String,
    /// Role the client expects to log in as, if any
    pub role: Option<String>,
    pub ip: String,
}

/// Successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: IssuedSession,
    pub user: User,
}

/// Security coordinator
pub struct SecurityCoordinator {
    config: SecurityConfig,
    sessions: SessionStore,
    lockout: LockoutTracker,
    csrf: CsrfTokenStore,
    policy: PasswordPolicy,
    users: Arc<dyn UserRepository>,
    audit: Arc<dyn AuditSink>,
    clock: SharedClock,
}

impl SecurityCoordinator {
    /// Build the stores from the configuration
    pub fn new(
        config: SecurityConfig,
        users: Arc<dyn UserRepository>,
        audit: Arc<dyn AuditSink>,
        clock: SharedClock,
    ) -> Self {
        let jwt = JwtService::new(
            &config.jwt_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
            clock.clone(),
        );
        let sessions = SessionStore::new(jwt, config.session_idle_timeout, clock.clone());
        let lockout = LockoutTracker::new(
            LockoutConfig {
                max_attempts: config.max_login_attempts,
                lockout_duration: config.lockout_duration,
            },
            clock.clone(),
        );
        let csrf = CsrfTokenStore::new(config.csrf_token_ttl(), clock.clone());
        let policy = PasswordPolicy::new(config.password_min_length);

        Self {
            config,
            sessions,
            lockout,
            csrf,
            policy,
            users,
            audit,
            clock,
        }
    }

    /// Authenticate with email and password and open a session
    pub async fn login(&self, attempt: LoginAttempt) -> SecurityResult<LoginOutcome> {
        let identifier = lockout_identifier(attempt.email.as_deref(), &attempt.ip);

        if let Some(lock) = self.lockout.check_lock(&identifier).await {
            self.audit(SecurityEvent::LockedLoginRejected {
                identifier,
                ip: attempt.ip,
            });
            return Err(SecurityError::AccountLocked {
                locked_until: Some(lock.locked_until),
            });
        }

        let user = match attempt.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => self.users.find_by_email(email).await?,
            _ => None,
        };

        let Some(mut user) = user.filter(|user| credentials_match(user, &attempt)) else {
            return Err(self.reject_login(&identifier, &attempt.ip).await);
        };

        self.lockout.reset(&identifier).await;

        let session = self
            .sessions
            .create(&Principal::from(&user))
            .await
            .map_err(session_error)?;

        let now = self.clock.now();
        self.users.record_login(user.id, now).await?;
        user.last_login_at = Some(now);

        info!("User {} logged in", user.id);
        self.audit(SecurityEvent::LoginSucceeded {
            principal_id: user.id,
            ip: attempt.ip,
        });

        Ok(LoginOutcome { session, user })
    }

    async fn reject_login(&self, identifier: &str, ip: &str) -> SecurityError {
        let outcome = self.lockout.record_failure(identifier).await;

        if outcome.locked {
            if outcome.newly_locked {
                if let Some(locked_until) = outcome.locked_until {
                    self.audit(SecurityEvent::AccountLocked {
                        identifier: identifier.to_string(),
                        ip: ip.to_string(),
                        locked_until,
                    });
                }
            }
            return SecurityError::AccountLocked {
                locked_until: outcome.locked_until,
            };
        }

        self.audit(SecurityEvent::LoginFailed {
            identifier: identifier.to_string(),
            ip: ip.to_string(),
            attempts: outcome.attempts,
        });

        SecurityError::AuthenticationFailure {
            remaining_attempts: self.lockout.remaining_attempts(outcome.attempts),
        }
    }

    /// Mint a new access token from a refresh token
    ///
    /// The token is minted for the principal as currently stored, so role
    /// changes apply from the next refresh and disabled principals are refused.
    pub async fn refresh(&self, refresh_token: &str) -> SecurityResult<RefreshedSession> {
        let claims = self
            .sessions
            .jwt()
            .verify_refresh(refresh_token)
            .map_err(|e| self.reject_refresh(&e.to_string()))?;

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .filter(|user| user.is_active);

        let Some(user) = user else {
            self.sessions.invalidate_principal(claims.sub).await;
            return Err(self.reject_refresh("principal disabled"));
        };

        self.sessions
            .refresh_as(refresh_token, &Principal::from(&user))
            .await
            .map_err(|e| match e {
                SessionError::InvalidRefresh => self.reject_refresh(&e.to_string()),
                SessionError::Signing(_) => session_error(e),
            })
    }

    fn reject_refresh(&self, reason: &str) -> SecurityError {
        self.audit(SecurityEvent::RefreshRejected {
            reason: reason.to_string(),
        });
        SecurityError::TokenInvalid
    }

    /// Resolve an access token to the principal and touch its session
    pub async fn authenticate(&self, access_token: &str) -> SecurityResult<AuthUser> {
        let claims = self.sessions.jwt().verify_access(access_token).map_err(|e| {
            debug!("Access token rejected: {}", e);
            SecurityError::TokenInvalid
        })?;

        match self.sessions.status(&claims.sid).await {
            SessionStatus::Active => {}
            SessionStatus::IdleExpired => {
                self.audit(SecurityEvent::SessionExpired {
                    principal_id: claims.sub,
                });
                return Err(SecurityError::SessionExpired);
            }
            SessionStatus::Missing => return Err(SecurityError::TokenInvalid),
        }

        self.sessions.touch(&claims.sid).await;

        Ok(AuthUser {
            principal: Principal {
                id: claims.sub,
                email: claims.email,
                role: claims.role,
            },
            session_id: claims.sid,
        })
    }

    /// End the caller's session
    pub async fn logout(&self, user: &AuthUser) {
        self.sessions.invalidate(&user.session_id).await;
        self.audit(SecurityEvent::LoggedOut {
            principal_id: user.principal.id,
        });
    }

    /// Change (or set a first) password
    ///
    /// Stages run in order and the principal record is written once, only
    /// after every stage has passed.
    pub async fn change_password(
        &self,
        principal_id: Uuid,
        old_password: Option<&str>,
        new_password: &str,
    ) -> SecurityResult<PasswordStrength> {
        let user = self
            .users
            .find_by_id(principal_id)
            .await?
            .ok_or_else(|| SecurityError::NotFound("User".to_string()))?;

        if let Some(current_hash) = user.password_hash.as_deref() {
            let matches = old_password.is_some_and(|old| verify_password(old, current_hash));
            if !matches {
                self.reject_password(principal_id, "current password mismatch");
                return Err(SecurityError::InvalidCurrentPassword);
            }
        }

        let strength = self.policy.score(new_password);
        if self.config.require_strong_password {
            if !strength.valid {
                self.reject_password(principal_id, "policy violation");
                return Err(SecurityError::PolicyViolation {
                    errors: strength.errors.clone(),
                    strength,
                });
            }
        } else if new_password.is_empty() {
            self.reject_password(principal_id, "empty password");
            return Err(SecurityError::PolicyViolation {
                errors: vec!["Password is required".to_string()],
                strength,
            });
        }

        let matches_current = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(new_password, hash));
        if check_reuse(new_password, &user.password_history) || matches_current {
            self.reject_password(principal_id, "password reuse");
            return Err(SecurityError::PasswordReused);
        }

        let new_hash = hash_password(new_password)?;
        let history = record_new_password(new_hash.clone(), &user.password_history);
        self.users
            .update_password(principal_id, &new_hash, &history)
            .await?;

        info!("Password updated for user {}", principal_id);
        self.audit(SecurityEvent::PasswordChanged { principal_id });

        Ok(strength)
    }

    fn reject_password(&self, principal_id: Uuid, reason: &str) {
        self.audit(SecurityEvent::PasswordRejected {
            principal_id,
            reason: reason.to_string(),
        });
    }

    /// Disable a principal and revoke every session it holds
    pub async fn ban(&self, actor: &AuthUser, target: Uuid) -> SecurityResult<usize> {
        if actor.principal.role != ADMIN_ROLE {
            warn!(
                "Principal {} attempted to ban {} without admin role",
                actor.principal.id, target
            );
            return Err(SecurityError::Forbidden);
        }

        if !self.users.set_active(target, false).await? {
            return Err(SecurityError::NotFound("User".to_string()));
        }

        let sessions_revoked = self.sessions.invalidate_principal(target).await;
        self.audit(SecurityEvent::PrincipalBanned {
            principal_id: target,
            by: actor.principal.id,
            sessions_revoked,
        });

        Ok(sessions_revoked)
    }

    /// Change the role of a principal
    ///
    /// Open sessions pick the new role up on their next refresh.
    pub async fn set_role(
        &self,
        actor: &AuthUser,
        target: Uuid,
        role: &str,
    ) -> SecurityResult<()> {
        if actor.principal.role != ADMIN_ROLE {
            warn!(
                "Principal {} attempted to change the role of {} without admin role",
                actor.principal.id, target
            );
            return Err(SecurityError::Forbidden);
        }

        let role = role.trim();
        if role.is_empty() {
            return Err(SecurityError::BadRequest("Role is required".to_string()));
        }

        if !self.users.update_role(target, role).await? {
            return Err(SecurityError::NotFound("User".to_string()));
        }

        info!("Role of user {} changed to {}", target, role);
        self.audit(SecurityEvent::RoleChanged {
            principal_id: target,
            by: actor.principal.id,
            role: role.to_string(),
        });

        Ok(())
    }

    /// Current record of an authenticated principal
    pub async fn current_user(&self, user: &AuthUser) -> SecurityResult<User> {
        self.users
            .find_by_id(user.principal.id)
            .await?
            .ok_or(SecurityError::TokenInvalid)
    }

    /// Issue an anti-forgery token for a key
    pub async fn issue_csrf(&self, principal_key: &str) -> String {
        self.csrf.issue(principal_key).await
    }

    /// Validate an anti-forgery token; always passes when protection is off
    pub async fn validate_csrf(&self, principal_key: &str, token: &str) -> bool {
        if !self.config.enable_csrf_protection {
            return true;
        }
        self.csrf.validate(principal_key, token).await
    }

    /// Hand an event to the audit sink
    pub fn audit(&self, event: SecurityEvent) {
        self.audit.record(event);
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn lockout(&self) -> &LockoutTracker {
        &self.lockout
    }

    pub fn csrf(&self) -> &CsrfTokenStore {
        &self.csrf
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }
}

/// Active account, optional role match and password match
fn credentials_match(user: &User, attempt: &LoginAttempt) -> bool {
    if !user.is_active {
        return false;
    }

    if let Some(role) = attempt.role.as_deref().filter(|r| !r.is_empty()) {
        if !role.eq_ignore_ascii_case(&user.role) {
            return false;
        }
    }

    user.password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&attempt.password, hash))
}

fn session_error(e: SessionError) -> SecurityError {
    match e {
        SessionError::InvalidRefresh => SecurityError::TokenInvalid,
        SessionError::Signing(e) => SecurityError::Internal(e.into()),
    }
}
