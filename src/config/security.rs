// ABOUTME: Security configuration types for authentication, hashing, and throttling
// ABOUTME: Handles token lifetimes, signing key material, location policy, and rate guard thresholds
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::constants::{credentials, rate_guard, service, token_ttl};
use crate::errors::{AppError, AppResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// What happens when a login comes from an unrecognized fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LocationPolicy {
    /// Withhold tokens until the emailed approval link is used
    #[default]
    Require,
    /// Issue tokens, remember the location, and email a new-login notice
    NotifyOnly,
}

impl FromStr for LocationPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "require" => Ok(Self::Require),
            "notify-only" | "notify_only" | "notify" => Ok(Self::NotifyOnly),
            other => Err(AppError::config(format!(
                "Invalid LOCATION_POLICY '{other}', expected 'require' or 'notify-only'"
            ))),
        }
    }
}

/// Token lifetimes in seconds, one per token kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTtlConfig {
    /// Access token lifetime
    pub access_secs: i64,
    /// Refresh token and session lifetime
    pub refresh_secs: i64,
    /// Pending two-factor challenge lifetime
    pub two_factor_secs: i64,
    /// Location approval link lifetime
    pub approval_secs: i64,
    /// Impersonation grant lifetime
    pub impersonation_secs: i64,
    /// Email verification link lifetime
    pub email_verify_secs: i64,
    /// Password reset link lifetime
    pub password_reset_secs: i64,
    /// Default API key token lifetime when the caller gives none
    pub api_key_secs: i64,
}

impl Default for TokenTtlConfig {
    fn default() -> Self {
        Self {
            access_secs: token_ttl::ACCESS_SECS,
            refresh_secs: token_ttl::REFRESH_SECS,
            two_factor_secs: token_ttl::TWO_FACTOR_SECS,
            approval_secs: token_ttl::APPROVAL_SECS,
            impersonation_secs: token_ttl::IMPERSONATION_SECS,
            email_verify_secs: token_ttl::EMAIL_VERIFY_SECS,
            password_reset_secs: token_ttl::PASSWORD_RESET_SECS,
            api_key_secs: token_ttl::API_KEY_SECS,
        }
    }
}

impl TokenTtlConfig {
    /// Load token lifetimes from environment
    ///
    /// # Errors
    ///
    /// Returns an error if a lifetime variable is not a positive integer
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            access_secs: positive_secs("ACCESS_TOKEN_TTL_SECS", defaults.access_secs)?,
            refresh_secs: positive_secs("REFRESH_TOKEN_TTL_SECS", defaults.refresh_secs)?,
            two_factor_secs: positive_secs("TWO_FACTOR_TTL_SECS", defaults.two_factor_secs)?,
            approval_secs: positive_secs("APPROVAL_TOKEN_TTL_SECS", defaults.approval_secs)?,
            impersonation_secs: positive_secs(
                "IMPERSONATION_TTL_SECS",
                defaults.impersonation_secs,
            )?,
            email_verify_secs: positive_secs(
                "EMAIL_VERIFY_TTL_SECS",
                defaults.email_verify_secs,
            )?,
            password_reset_secs: positive_secs(
                "PASSWORD_RESET_TTL_SECS",
                defaults.password_reset_secs,
            )?,
            api_key_secs: positive_secs("API_KEY_TTL_SECS", defaults.api_key_secs)?,
        })
    }

    /// Access token lifetime
    #[must_use]
    pub fn access(&self) -> Duration {
        Duration::seconds(self.access_secs)
    }

    /// Refresh token lifetime
    #[must_use]
    pub fn refresh(&self) -> Duration {
        Duration::seconds(self.refresh_secs)
    }

    /// Two-factor challenge lifetime
    #[must_use]
    pub fn two_factor(&self) -> Duration {
        Duration::seconds(self.two_factor_secs)
    }

    /// Approval link lifetime
    #[must_use]
    pub fn approval(&self) -> Duration {
        Duration::seconds(self.approval_secs)
    }

    /// Impersonation grant lifetime
    #[must_use]
    pub fn impersonation(&self) -> Duration {
        Duration::seconds(self.impersonation_secs)
    }

    /// Email verification lifetime
    #[must_use]
    pub fn email_verify(&self) -> Duration {
        Duration::seconds(self.email_verify_secs)
    }

    /// Password reset lifetime
    #[must_use]
    pub fn password_reset(&self) -> Duration {
        Duration::seconds(self.password_reset_secs)
    }

    /// Default API key lifetime
    #[must_use]
    pub fn api_key(&self) -> Duration {
        Duration::seconds(self.api_key_secs)
    }

    /// Longest lifetime of any token kind
    #[must_use]
    pub fn longest_secs(&self) -> i64 {
        [
            self.access_secs,
            self.refresh_secs,
            self.two_factor_secs,
            self.approval_secs,
            self.impersonation_secs,
            self.email_verify_secs,
            self.password_reset_secs,
            self.api_key_secs,
        ]
        .into_iter()
        .max()
        .unwrap_or_default()
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PasswordHashConfig {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        Self {
            memory_kib: credentials::ARGON2_MEMORY_KIB,
            iterations: credentials::ARGON2_ITERATIONS,
            parallelism: credentials::ARGON2_PARALLELISM,
        }
    }
}

impl PasswordHashConfig {
    /// Cheapest parameters argon2 accepts; for tests and local development only
    #[must_use]
    pub const fn minimal() -> Self {
        Self {
            memory_kib: 768,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Load hashing cost from environment
    ///
    /// # Errors
    ///
    /// Returns an error if a cost variable is not a valid integer
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            memory_kib: parse_env_or("ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_env_or("ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: parse_env_or("ARGON2_PARALLELISM", defaults.parallelism)?,
        })
    }
}

/// Authentication configuration for token issuance and login policy
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// `iss` claim
    pub issuer: String,
    /// `aud` claim
    pub audience: String,
    /// Lifetimes per token kind
    pub ttl: TokenTtlConfig,
    /// How long a rotated-out signing key keeps verifying tokens
    pub key_retention_secs: i64,
    /// Initial signing secret; a random one is generated when absent
    #[serde(skip)]
    pub signing_secret: Option<Zeroizing<Vec<u8>>>,
    /// New-location login policy
    pub location_policy: LocationPolicy,
    /// Issuer label shown in authenticator apps
    pub totp_issuer: String,
    /// Password and backup code hashing cost
    pub password_hash: PasswordHashConfig,
    /// Reverse proxies in front of the service that append to `X-Forwarded-For`;
    /// 0 trusts only the socket peer address
    pub trusted_proxy_depth: usize,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl", &self.ttl)
            .field("key_retention_secs", &self.key_retention_secs)
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("location_policy", &self.location_policy)
            .field("totp_issuer", &self.totp_issuer)
            .field("password_hash", &self.password_hash)
            .field("trusted_proxy_depth", &self.trusted_proxy_depth)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: service::DEFAULT_ISSUER.to_owned(),
            audience: service::DEFAULT_AUDIENCE.to_owned(),
            ttl: TokenTtlConfig::default(),
            key_retention_secs: token_ttl::KEY_RETENTION_SECS,
            signing_secret: None,
            location_policy: LocationPolicy::default(),
            totp_issuer: service::DEFAULT_TOTP_ISSUER.to_owned(),
            password_hash: PasswordHashConfig::default(),
            trusted_proxy_depth: 0,
        }
    }
}

impl AuthConfig {
    /// Load authentication configuration from environment
    ///
    /// # Errors
    ///
    /// Returns an error if auth environment variables are invalid
    pub fn from_env() -> AppResult<Self> {
        let signing_secret = match env::var("GATEHOUSE_SIGNING_SECRET") {
            Ok(encoded) => {
                let bytes = hex::decode(encoded.trim()).map_err(|e| {
                    AppError::config(format!("GATEHOUSE_SIGNING_SECRET must be hex: {e}"))
                })?;
                Some(Zeroizing::new(bytes))
            }
            Err(_) => None,
        };

        let config = Self {
            issuer: env_var_or("TOKEN_ISSUER", service::DEFAULT_ISSUER),
            audience: env_var_or("TOKEN_AUDIENCE", service::DEFAULT_AUDIENCE),
            ttl: TokenTtlConfig::from_env()?,
            key_retention_secs: positive_secs(
                "SIGNING_KEY_RETENTION_SECS",
                token_ttl::KEY_RETENTION_SECS,
            )?,
            signing_secret,
            location_policy: env_var_or("LOCATION_POLICY", "require").parse()?,
            totp_issuer: env_var_or("TOTP_ISSUER", service::DEFAULT_TOTP_ISSUER),
            password_hash: PasswordHashConfig::from_env()?,
            trusted_proxy_depth: parse_env_or("TRUSTED_PROXY_DEPTH", 0)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rotated-out signing key lifetime
    #[must_use]
    pub fn key_retention(&self) -> Duration {
        Duration::seconds(self.key_retention_secs)
    }

    /// Reject settings under which unexpired tokens could stop verifying
    ///
    /// # Errors
    ///
    /// Returns a config error if the key retention is shorter than the
    /// longest token lifetime
    pub fn validate(&self) -> AppResult<()> {
        let longest = self.ttl.longest_secs();
        if self.key_retention_secs < longest {
            return Err(AppError::config(format!(
                "SIGNING_KEY_RETENTION_SECS ({}) must cover the longest token lifetime ({longest}s)",
                self.key_retention_secs
            )));
        }
        Ok(())
    }
}

/// Failure counting and lockout thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateGuardConfig {
    /// Failed attempts allowed before lockout (k)
    pub max_failures: u64,
    /// First lockout duration
    pub base_lockout_secs: u64,
    /// Cap for geometric lockout growth
    pub max_lockout_secs: u64,
    /// Counting window
    pub window_secs: u64,
    /// Attempts allowed per IP per window across every account
    pub ip_ceiling: u64,
}

impl Default for RateGuardConfig {
    fn default() -> Self {
        Self {
            max_failures: rate_guard::MAX_FAILURES,
            base_lockout_secs: rate_guard::BASE_LOCKOUT_SECS,
            max_lockout_secs: rate_guard::MAX_LOCKOUT_SECS,
            window_secs: rate_guard::WINDOW_SECS,
            ip_ceiling: rate_guard::IP_CEILING,
        }
    }
}

impl RateGuardConfig {
    /// Load rate guard thresholds from environment
    ///
    /// # Errors
    ///
    /// Returns an error if a threshold is not a valid integer or is zero
    pub fn from_env() -> AppResult<Self> {
        let config = Self {
            max_failures: parse_env_or("RATE_GUARD_MAX_FAILURES", rate_guard::MAX_FAILURES)?,
            base_lockout_secs: parse_env_or(
                "RATE_GUARD_BASE_LOCKOUT_SECS",
                rate_guard::BASE_LOCKOUT_SECS,
            )?,
            max_lockout_secs: parse_env_or(
                "RATE_GUARD_MAX_LOCKOUT_SECS",
                rate_guard::MAX_LOCKOUT_SECS,
            )?,
            window_secs: parse_env_or("RATE_GUARD_WINDOW_SECS", rate_guard::WINDOW_SECS)?,
            ip_ceiling: parse_env_or("RATE_GUARD_IP_CEILING", rate_guard::IP_CEILING)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject thresholds that would disable the guard
    ///
    /// # Errors
    ///
    /// Returns an error if any threshold is zero or the cap is below the base lockout
    pub fn validate(&self) -> AppResult<()> {
        if self.max_failures == 0 || self.window_secs == 0 || self.ip_ceiling == 0 {
            return Err(AppError::config(
                "Rate guard thresholds and window must be greater than zero",
            ));
        }
        if self.max_lockout_secs < self.base_lockout_secs {
            return Err(AppError::config(
                "RATE_GUARD_MAX_LOCKOUT_SECS must not be below RATE_GUARD_BASE_LOCKOUT_SECS",
            ));
        }
        Ok(())
    }
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an environment variable, falling back to `default` when unset
pub(crate) fn parse_env_or<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::config(format!("Invalid {key} value '{raw}': {e}"))),
        Err(_) => Ok(default),
    }
}

fn positive_secs(key: &str, default: i64) -> AppResult<i64> {
    let value = parse_env_or(key, default)?;
    if value <= 0 {
        return Err(AppError::config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}
