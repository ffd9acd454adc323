//! Account lockout tracking for preventing brute force attacks
//!
//! Failed logins are counted per identifier: the submitted email, or the
//! requesting IP when no email was supplied. Tracking does not depend on the
//! account existing. Rotating emails from one address is therefore not
//! throttled here; that is left to network-level rate limiting.

use chrono::{DateTime, Duration, Utc};
use common::SharedClock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Lockout configuration
#[derive(Debug, Clone)]
pub struct LockoutConfig {
    /// Failed attempts that trigger a lock
    pub max_attempts: u32,
    /// How long a lock lasts
    pub lockout_duration: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_duration: Duration::minutes(15),
        }
    }
}

/// Failed-attempt state of one identifier
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutRecord {
    pub identifier: String,
    pub attempts: u32,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutRecord {
    fn lock_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.locked_until.is_none_or(|until| now >= until)
    }
}

/// Result of recording a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Consecutive failures, including this one
    pub attempts: u32,
    /// Whether the identifier is locked now
    pub locked: bool,
    /// Whether this failure is the one that locked it
    pub newly_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
}

/// An active lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub attempts: u32,
    pub locked_until: DateTime<Utc>,
}

/// Lockout tracker
#[derive(Debug, Clone)]
pub struct LockoutTracker {
    config: LockoutConfig,
    clock: SharedClock,
    records: Arc<Mutex<HashMap<String, LockoutRecord>>>,
}

impl LockoutTracker {
    /// Create a new lockout tracker
    pub fn new(config: LockoutConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count a failed login for an identifier
    pub async fn record_failure(&self, identifier: &str) -> FailureOutcome {
        let now = self.clock.now();
        let mut records = self.records.lock().await;

        let record = records
            .entry(identifier.to_string())
            .or_insert_with(|| LockoutRecord {
                identifier: identifier.to_string(),
                attempts: 0,
                first_attempt_at: now,
                last_attempt_at: now,
                locked: false,
                locked_until: None,
            });

        // A lapsed lock starts a fresh count
        if record.lock_elapsed(now) {
            record.attempts = 0;
            record.locked = false;
            record.locked_until = None;
            record.first_attempt_at = now;
        }

        record.attempts = record.attempts.saturating_add(1);
        record.last_attempt_at = now;

        let mut newly_locked = false;
        if !record.locked && record.attempts >= self.config.max_attempts {
            record.locked = true;
            record.locked_until = Some(now + self.config.lockout_duration);
            newly_locked = true;
            warn!(
                "Locked identifier {} after {} failed attempts",
                identifier, record.attempts
            );
        }

        FailureOutcome {
            attempts: record.attempts,
            locked: record.locked,
            newly_locked,
            locked_until: record.locked_until,
        }
    }

    /// Current lock on an identifier, if any
    ///
    /// An elapsed lock is cleared as a side effect.
    pub async fn check_lock(&self, identifier: &str) -> Option<LockInfo> {
        let now = self.clock.now();
        let mut records = self.records.lock().await;
        let record = records.get_mut(identifier)?;

        if !record.locked {
            return None;
        }

        if record.lock_elapsed(now) {
            record.attempts = 0;
            record.locked = false;
            record.locked_until = None;
            info!("Lock on identifier {} expired", identifier);
            return None;
        }

        record.locked_until.map(|locked_until| LockInfo {
            attempts: record.attempts,
            locked_until,
        })
    }

    /// Forget an identifier after a successful login
    pub async fn reset(&self, identifier: &str) {
        self.records.lock().await.remove(identifier);
    }

    /// Attempts left before a lock, given the current count
    pub fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.config.max_attempts.saturating_sub(attempts)
    }

    /// Snapshot of the record for an identifier
    pub async fn record(&self, identifier: &str) -> Option<LockoutRecord> {
        self.records.lock().await.get(identifier).cloned()
    }

    /// Drop records that no longer carry information
    ///
    /// Locked records are kept until their lock elapses; unlocked ones once
    /// their last failure is older than the lockout duration.
    pub async fn sweep_stale(&self) -> usize {
        let now = self.clock.now();
        let stale_after = self.config.lockout_duration;
        let mut records = self.records.lock().await;
        let before = records.len();

        records.retain(|_, record| {
            if record.locked {
                !record.lock_elapsed(now)
            } else {
                now - record.last_attempt_at <= stale_after
            }
        });

        before - records.len()
    }

    /// Get the lockout configuration
    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }
}

/// Identifier used for lockout tracking: the email if supplied, else the IP
pub fn lockout_identifier(email: Option<&str>, ip: &str) -> String {
    match email.map(str::trim).filter(|e| !e.is_empty()) {
        Some(email) => email.to_lowercase(),
        None => ip.to_string(),
    }
}
