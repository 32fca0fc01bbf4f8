// ABOUTME: Brute-force throttling with per-subject failure counters, geometric lockouts, and a per-IP ceiling
// ABOUTME: All counting goes through atomic cache increments so concurrent attempts cannot slip past the limit
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Rate Guard
//!
//! Each attempt is counted *before* it runs: `check` increments the failure
//! counter for the key and rejects once the count passes the threshold, and a
//! successful `record` resets it. Counting up front means N concurrent guesses
//! cannot all observe "k - 1 failures so far" and proceed together.
//!
//! Reaching the threshold starts a lockout whose length doubles with each
//! consecutive lockout up to a cap. A separate per-IP ceiling applies across
//! every account and action. Actions that present a signed token only charge
//! the ceiling when they fail, so a busy client verifying its own tokens
//! cannot starve logins from the same address.

use crate::cache::{Cache, CacheKey, CacheProvider};
use crate::config::RateGuardConfig;
use crate::errors::{AppError, AppResult, ErrorCode};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Gated operation; counters are kept per action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateAction {
    /// Password login
    Login,
    /// Second-factor code entry
    TwoFactor,
    /// Refresh token exchange
    Refresh,
    /// Logout
    Logout,
    /// Account registration
    Register,
    /// Email verification link
    VerifyEmail,
    /// New-location approval link
    ApproveLocation,
    /// Password reset request or completion
    PasswordReset,
    /// Impersonation grant
    Impersonate,
    /// Generic token verification
    VerifyToken,
}

impl RateAction {
    /// Stable name used in counter keys and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::TwoFactor => "two_factor",
            Self::Refresh => "refresh",
            Self::Logout => "logout",
            Self::Register => "register",
            Self::VerifyEmail => "verify_email",
            Self::ApproveLocation => "approve_location",
            Self::PasswordReset => "password_reset",
            Self::Impersonate => "impersonate",
            Self::VerifyToken => "verify_token",
        }
    }

    /// Whether the caller proves itself with a signed token rather than a secret guess
    #[must_use]
    pub const fn presents_token(self) -> bool {
        matches!(self, Self::Refresh | Self::Logout | Self::VerifyToken)
    }
}

impl fmt::Display for RateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a gated attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOutcome {
    /// Attempt succeeded; counters for the key reset
    Success,
    /// Attempt failed an auth check
    Failure,
}

/// Who is attempting: the subject when known, and always the client IP
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    subject: Option<String>,
    ip: String,
}

impl RateKey {
    /// Key for an anonymous caller
    #[must_use]
    pub fn ip(ip: &str) -> Self {
        Self {
            subject: None,
            ip: ip.to_owned(),
        }
    }

    /// Key for a caller claiming a specific subject (email, user id, token id)
    #[must_use]
    pub fn subject(subject: &str, ip: &str) -> Self {
        Self {
            subject: Some(subject.to_lowercase()),
            ip: ip.to_owned(),
        }
    }

    /// Client IP
    #[must_use]
    pub fn client_ip(&self) -> &str {
        &self.ip
    }

    fn scope(&self, action: RateAction) -> String {
        match &self.subject {
            Some(subject) => format!("{action}:subject:{subject}"),
            None => format!("{action}:ip:{}", self.ip),
        }
    }
}

/// Counter storage; implemented by the cache and faked in tests
#[async_trait]
pub trait RateCounterStore: Send + Sync {
    /// Atomically increment, starting a fixed window on first use
    async fn increment(&self, key: &CacheKey, window: Duration) -> AppResult<u64>;

    /// Current counter value
    async fn count(&self, key: &CacheKey) -> AppResult<Option<u64>>;

    /// Overwrite a counter
    async fn put_count(&self, key: &CacheKey, value: u64, ttl: Duration) -> AppResult<()>;

    /// Set a marker unless one is live; returns whether it was set
    async fn arm(&self, key: &CacheKey, ttl: Duration) -> AppResult<bool>;

    /// Remaining lifetime of a marker or counter
    async fn remaining(&self, key: &CacheKey) -> AppResult<Option<Duration>>;

    /// Drop a marker or counter
    async fn clear(&self, key: &CacheKey) -> AppResult<()>;
}

#[async_trait]
impl RateCounterStore for Cache {
    async fn increment(&self, key: &CacheKey, window: Duration) -> AppResult<u64> {
        CacheProvider::increment(self, key, window).await
    }

    async fn count(&self, key: &CacheKey) -> AppResult<Option<u64>> {
        self.get(key).await
    }

    async fn put_count(&self, key: &CacheKey, value: u64, ttl: Duration) -> AppResult<()> {
        self.set(key, &value, ttl).await
    }

    async fn arm(&self, key: &CacheKey, ttl: Duration) -> AppResult<bool> {
        self.set_if_absent(key, &true, ttl).await
    }

    async fn remaining(&self, key: &CacheKey) -> AppResult<Option<Duration>> {
        self.ttl(key).await
    }

    async fn clear(&self, key: &CacheKey) -> AppResult<()> {
        self.invalidate(key).await
    }
}

/// Gates every auth attempt
#[derive(Clone)]
pub struct RateGuard {
    store: Arc<dyn RateCounterStore>,
    config: RateGuardConfig,
}

impl RateGuard {
    /// Create a guard over any counter store
    #[must_use]
    pub fn new(store: Arc<dyn RateCounterStore>, config: RateGuardConfig) -> Self {
        Self { store, config }
    }

    /// Admit or reject an attempt, counting it against the key
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` with a retry hint when the IP ceiling is exceeded,
    /// the key is locked out, or this attempt crosses the failure threshold.
    pub async fn check(&self, key: &RateKey, action: RateAction) -> AppResult<()> {
        let window = Duration::from_secs(self.config.window_secs);

        if !action.presents_token() {
            self.charge_ip(key, action).await?;
        }

        let scope = key.scope(action);
        let lockout_key = CacheKey::RateLockout {
            scope: scope.clone(),
        };
        if let Some(remaining) = self.store.remaining(&lockout_key).await? {
            debug!(scope = %scope, remaining_secs = remaining.as_secs(), "attempt during lockout");
            return Err(AppError::rate_limited(ceil_secs(Some(remaining))));
        }

        let failures_key = CacheKey::RateFailures {
            scope: scope.clone(),
        };
        let attempts = self.store.increment(&failures_key, window).await?;
        if attempts > self.config.max_failures {
            let retry = self.escalate(&scope).await?;
            return Err(AppError::rate_limited(retry));
        }

        Ok(())
    }

    /// Record how a checked attempt ended
    ///
    /// # Errors
    ///
    /// Returns a cache error if counters cannot be updated
    pub async fn record(&self, key: &RateKey, action: RateAction, outcome: RateOutcome) -> AppResult<()> {
        let scope = key.scope(action);
        match outcome {
            RateOutcome::Success => {
                self.store
                    .clear(&CacheKey::RateFailures {
                        scope: scope.clone(),
                    })
                    .await?;
                self.store.clear(&CacheKey::RateLevel { scope }).await
            }
            RateOutcome::Failure => {
                if action.presents_token() {
                    // The ceiling is enforced on the next attempt, not this one
                    match self.charge_ip(key, action).await {
                        Err(e) if e.code != ErrorCode::RateLimited => return Err(e),
                        _ => {}
                    }
                }
                let failures = self
                    .store
                    .count(&CacheKey::RateFailures {
                        scope: scope.clone(),
                    })
                    .await?
                    .unwrap_or(0);
                if failures >= self.config.max_failures {
                    self.escalate(&scope).await?;
                }
                Ok(())
            }
        }
    }

    /// Count one attempt against the per-IP ceiling
    async fn charge_ip(&self, key: &RateKey, action: RateAction) -> AppResult<()> {
        let window = Duration::from_secs(self.config.window_secs);
        let ip_key = CacheKey::IpAttempts {
            ip: key.ip.clone(),
        };
        let ip_attempts = self.store.increment(&ip_key, window).await?;
        if ip_attempts > self.config.ip_ceiling {
            let retry = self.store.remaining(&ip_key).await?;
            warn!(
                ip = %key.ip,
                attempts = ip_attempts,
                action = %action,
                "per-IP attempt ceiling exceeded"
            );
            return Err(AppError::rate_limited(ceil_secs(retry)));
        }
        Ok(())
    }

    /// Start the next lockout for a scope; returns seconds until it lifts
    async fn escalate(&self, scope: &str) -> AppResult<u64> {
        let lockout_key = CacheKey::RateLockout {
            scope: scope.to_owned(),
        };
        let level_key = CacheKey::RateLevel {
            scope: scope.to_owned(),
        };

        let level = self.store.count(&level_key).await?.unwrap_or(0) + 1;
        let lockout = self.lockout_for(level);

        if self.store.arm(&lockout_key, lockout).await? {
            let level_ttl = Duration::from_secs(self.config.max_lockout_secs + self.config.window_secs);
            self.store.put_count(&level_key, level, level_ttl).await?;
            self.store
                .clear(&CacheKey::RateFailures {
                    scope: scope.to_owned(),
                })
                .await?;
            warn!(
                scope = %scope,
                level = level,
                lockout_secs = lockout.as_secs(),
                "failure threshold reached, locking out"
            );
            Ok(lockout.as_secs())
        } else {
            // Someone else escalated concurrently
            Ok(ceil_secs(self.store.remaining(&lockout_key).await?))
        }
    }

    /// `base * 2^(level-1)`, capped
    fn lockout_for(&self, level: u64) -> Duration {
        let exponent = u32::try_from(level.saturating_sub(1)).unwrap_or(u32::MAX).min(63);
        let secs = self
            .config
            .base_lockout_secs
            .saturating_mul(1_u64 << exponent)
            .min(self.config.max_lockout_secs);
        Duration::from_secs(secs.max(1))
    }
}

fn ceil_secs(remaining: Option<Duration>) -> u64 {
    remaining.map_or(1, |d| {
        let rounded_up = d.as_secs() + u64::from(d.subsec_nanos() > 0);
        rounded_up.max(1)
    })
}
