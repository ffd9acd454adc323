//! Password strength policy, hashing and reuse detection

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Number of previous password hashes kept per principal
pub const PASSWORD_HISTORY_LIMIT: usize = 5;

/// Characters that satisfy the special-character rule
pub const SPECIAL_CHARS: &str = r#"!@#$%^&*(),.?":{}|<>"#;

const CHECK_POINTS: u32 = 20;
const COMMON_PASSWORD_PENALTY: u32 = 40;
const LONG_BONUS_LENGTH: usize = 12;
const VERY_LONG_BONUS_LENGTH: usize = 16;
const LENGTH_BONUS: u32 = 10;
const MAX_SCORE: u32 = 100;

/// Frequently used passwords rejected regardless of composition
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "123456",
    "12345678",
    "123456789",
    "1234567890",
    "qwerty",
    "qwerty123",
    "abc123",
    "111111",
    "letmein",
    "welcome",
    "welcome1",
    "admin",
    "admin123",
    "iloveyou",
    "monkey",
    "dragon",
    "master",
    "sunshine",
    "princess",
    "football",
    "baseball",
    "trustno1",
    "passw0rd",
    "p@ssw0rd",
    "p@ssword1",
    "changeme",
];

/// Outcome of scoring a password
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordStrength {
    /// No rule was violated
    pub valid: bool,
    /// Human-readable rule violations
    pub errors: Vec<String>,
    /// 0 to 100
    pub score: u32,
}

impl PasswordStrength {
    /// Coarse label for the score
    pub fn label(&self) -> &'static str {
        strength_label(self.score)
    }
}

/// Label shown next to a score
pub fn strength_label(score: u32) -> &'static str {
    match score {
        0..=39 => "weak",
        40..=59 => "fair",
        60..=79 => "good",
        _ => "strong",
    }
}

/// Password policy
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

impl PasswordPolicy {
    /// Create a policy with the given minimum length
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    /// Minimum password length
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Score a password
    ///
    /// Five rules are worth 20 points each. A common password loses 40 points
    /// and is an error of its own. Length bonuses only affect the score.
    pub fn score(&self, password: &str) -> PasswordStrength {
        let mut errors = Vec::new();
        let mut score = 0u32;
        let length = password.chars().count();

        if length >= self.min_length {
            score += CHECK_POINTS;
        } else {
            errors.push(format!(
                "Password must be at least {} characters long",
                self.min_length
            ));
        }

        if password.chars().any(|c| c.is_uppercase()) {
            score += CHECK_POINTS;
        } else {
            errors.push("Password must contain at least one uppercase letter".to_string());
        }

        if password.chars().any(|c| c.is_lowercase()) {
            score += CHECK_POINTS;
        } else {
            errors.push("Password must contain at least one lowercase letter".to_string());
        }

        if password.chars().any(|c| c.is_ascii_digit()) {
            score += CHECK_POINTS;
        } else {
            errors.push("Password must contain at least one number".to_string());
        }

        if special_char_regex().is_match(password) {
            score += CHECK_POINTS;
        } else {
            errors.push(format!(
                "Password must contain at least one special character ({})",
                SPECIAL_CHARS
            ));
        }

        if is_common_password(password) {
            score = score.saturating_sub(COMMON_PASSWORD_PENALTY);
            errors.push("Password is too common, please choose a stronger password".to_string());
        }

        if length >= LONG_BONUS_LENGTH {
            score += LENGTH_BONUS;
        }
        if length >= VERY_LONG_BONUS_LENGTH {
            score += LENGTH_BONUS;
        }

        PasswordStrength {
            valid: errors.is_empty(),
            errors,
            score: score.min(MAX_SCORE),
        }
    }
}

fn special_char_regex() -> &'static Regex {
    static SPECIAL_CHAR_REGEX: OnceLock<Regex> = OnceLock::new();
    SPECIAL_CHAR_REGEX.get_or_init(|| {
        Regex::new(&format!("[{}]", regex::escape(SPECIAL_CHARS)))
            .expect("Failed to compile special character regex")
    })
}

/// Whether the password is on the common-password denylist
pub fn is_common_password(password: &str) -> bool {
    let lowered = password.to_lowercase();
    COMMON_PASSWORDS.contains(&lowered.as_str())
}

/// Hash a password with argon2 and a random salt
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an argon2 hash
///
/// An unparsable hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Whether a password matches any of the most recent history entries
///
/// Every entry is verified so the time taken does not reveal which one matched.
pub fn check_reuse(new_password: &str, history: &[String]) -> bool {
    history
        .iter()
        .take(PASSWORD_HISTORY_LIMIT)
        .fold(false, |reused, hash| verify_password(new_password, hash) | reused)
}

/// Prepend a hash to the history, keeping the most recent entries
pub fn record_new_password(hash: String, history: &[String]) -> Vec<String> {
    std::iter::once(hash)
        .chain(history.iter().cloned())
        .take(PASSWORD_HISTORY_LIMIT)
        .collect()
}
