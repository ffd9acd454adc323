//! Security configuration loaded from the environment

use anyhow::Result;
use chrono::Duration;

/// Lifetime of an anti-forgery token
pub const CSRF_TOKEN_TTL_MINUTES: i64 = 60;

/// Cron schedule of the idle-session sweep (every 5 minutes)
pub const SESSION_SWEEP_SCHEDULE: &str = "0 */5 * * * *";
/// Cron schedule of the CSRF token sweep (every 10 minutes)
pub const CSRF_SWEEP_SCHEDULE: &str = "0 */10 * * * *";
/// Cron schedule of the lockout record sweep (every 60 minutes)
pub const LOCKOUT_SWEEP_SCHEDULE: &str = "0 0 * * * *";

/// Security configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Secret used to sign access and refresh tokens (HS256)
    pub jwt_secret: String,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// Inactivity after which a session is treated as gone
    pub session_idle_timeout: Duration,
    /// Failed attempts before an identifier is locked
    pub max_login_attempts: u32,
    /// How long a lock lasts
    pub lockout_duration: Duration,
    /// Minimum password length
    pub password_min_length: usize,
    /// Enforce the password policy on change/set
    pub require_strong_password: bool,
    /// Enforce CSRF tokens on state-changing requests
    pub enable_csrf_protection: bool,
    /// Take the client address from `X-Forwarded-For`
    ///
    /// Only safe behind a proxy that overwrites the header; a directly
    /// exposed service must turn this off or clients pick their own lockout
    /// and CSRF keys.
    pub trust_proxy_headers: bool,
    /// Listen address of the HTTP server
    pub bind_addr: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(30),
            session_idle_timeout: Duration::minutes(30),
            max_login_attempts: 5,
            lockout_duration: Duration::minutes(15),
            password_min_length: 8,
            require_strong_password: true,
            enable_csrf_protection: true,
            trust_proxy_headers: true,
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl SecurityConfig {
    /// Create a new SecurityConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: HMAC secret for tokens (required)
    /// - `JWT_EXPIRE`: Access token lifetime, e.g. `15m` (default: 15m)
    /// - `JWT_REFRESH_EXPIRE`: Refresh token lifetime, e.g. `30d` (default: 30d)
    /// - `SESSION_TIMEOUT_MINUTES`: Session idle timeout (default: 30)
    /// - `MAX_LOGIN_ATTEMPTS`: Failures before lockout (default: 5)
    /// - `ACCOUNT_LOCKOUT_DURATION_MINUTES`: Lockout length (default: 15)
    /// - `PASSWORD_MIN_LENGTH`: Minimum password length (default: 8)
    /// - `REQUIRE_STRONG_PASSWORD`: `false` disables the password policy
    /// - `ENABLE_CSRF_PROTECTION`: `false` disables CSRF validation
    /// - `TRUST_PROXY_HEADERS`: `false` ignores `X-Forwarded-For`
    /// - `AUTH_BIND_ADDR`: Listen address (default: 0.0.0.0:3000)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;
        if jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }

        let access_token_ttl = std::env::var("JWT_EXPIRE")
            .ok()
            .and_then(|s| parse_duration(&s))
            .unwrap_or(defaults.access_token_ttl);

        let refresh_token_ttl = std::env::var("JWT_REFRESH_EXPIRE")
            .ok()
            .and_then(|s| parse_duration(&s))
            .unwrap_or(defaults.refresh_token_ttl);

        let session_idle_timeout = std::env::var("SESSION_TIMEOUT_MINUTES")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map(Duration::minutes)
            .unwrap_or(defaults.session_idle_timeout);

        let max_login_attempts = std::env::var("MAX_LOGIN_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(defaults.max_login_attempts);

        let lockout_duration = std::env::var("ACCOUNT_LOCKOUT_DURATION_MINUTES")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .map(Duration::minutes)
            .unwrap_or(defaults.lockout_duration);

        let password_min_length = std::env::var("PASSWORD_MIN_LENGTH")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .unwrap_or(defaults.password_min_length);

        let require_strong_password = flag_enabled("REQUIRE_STRONG_PASSWORD");
        let enable_csrf_protection = flag_enabled("ENABLE_CSRF_PROTECTION");
        let trust_proxy_headers = flag_enabled("TRUST_PROXY_HEADERS");

        let bind_addr = std::env::var("AUTH_BIND_ADDR").unwrap_or(defaults.bind_addr);

        Ok(SecurityConfig {
            jwt_secret,
            access_token_ttl,
            refresh_token_ttl,
            session_idle_timeout,
            max_login_attempts,
            lockout_duration,
            password_min_length,
            require_strong_password,
            enable_csrf_protection,
            trust_proxy_headers,
            bind_addr,
        })
    }

    /// CSRF token lifetime
    pub fn csrf_token_ttl(&self) -> Duration {
        Duration::minutes(CSRF_TOKEN_TTL_MINUTES)
    }
}

/// Feature flags stay on unless explicitly set to `false`
fn flag_enabled(name: &str) -> bool {
    std::env::var(name).map(|v| v.trim() != "false").unwrap_or(true)
}

/// Parse a lifetime such as `900`, `45s`, `15m`, `12h` or `30d`
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], Some(c)),
        _ => (raw, None),
    };

    let value: i64 = digits.trim().parse().ok()?;
    if value <= 0 {
        return None;
    }

    match unit {
        None | Some('s') => Some(Duration::seconds(value)),
        Some('m') => Some(Duration::minutes(value)),
        Some('h') => Some(Duration::hours(value)),
        Some('d') => Some(Duration::days(value)),
        _ => None,
    }
}
