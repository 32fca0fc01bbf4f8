// ABOUTME: Ephemeral state store abstraction for revocations, sessions, counters, and single-use markers
// ABOUTME: Pluggable backend support (in-memory, Redis) with atomic primitives shared by all auth components
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Cache factory for creating cache providers
pub mod factory;
/// In-memory cache implementation
pub mod memory;
/// Redis cache implementation
pub mod redis;

pub use crate::config::CacheConfig;
pub use factory::Cache;

use crate::errors::AppResult;
use crate::models::Id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Cache provider trait for pluggable backend implementations
///
/// Every write takes a TTL; nothing lives in the cache forever. The atomic
/// operations (`set_if_absent`, `take`, `compare_and_swap`, `increment`) are
/// what the auth components rely on for race-free revocation, rotation, and
/// counting, so each backend must implement them as a single indivisible step.
///
/// # Examples
///
/// ```rust,no_run
/// use gatehouse::cache::{CacheConfig, CacheKey, CacheProvider};
/// use gatehouse::cache::memory::InMemoryCache;
/// use std::time::Duration;
/// # async fn example() -> Result<(), gatehouse::errors::AppError> {
/// let config = CacheConfig {
///     enable_background_cleanup: false,
///     ..Default::default()
/// };
/// let cache = InMemoryCache::new(config).await?;
///
/// let key = CacheKey::RevokedToken { token_id: "jti-1".to_owned() };
/// assert!(cache.set_if_absent(&key, &true, Duration::from_secs(60)).await?);
/// assert!(!cache.set_if_absent(&key, &true, Duration::from_secs(60)).await?);
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait CacheProvider: Send + Sync + Clone {
    /// Create new cache instance with configuration
    ///
    /// # Errors
    ///
    /// Returns an error if cache initialization fails
    async fn new(config: CacheConfig) -> AppResult<Self>
    where
        Self: Sized;

    /// Store value in cache with TTL, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or storage fails
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<()>;

    /// Retrieve value from cache
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails
    async fn get<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>>;

    /// Store value only if the key holds no live entry; returns whether it was stored
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or storage fails
    async fn set_if_absent<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<bool>;

    /// Atomically read and delete a value
    ///
    /// Exactly one of any number of concurrent callers observes `Some`.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails
    async fn take<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>>;

    /// Replace the value only if it still equals `expected`; returns whether it was replaced
    ///
    /// Equality is on the serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or storage fails
    async fn compare_and_swap<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        expected: &T,
        new: &T,
        ttl: Duration,
    ) -> AppResult<bool>;

    /// Increment a counter; the TTL applies only when the counter is created
    ///
    /// Returns the value after incrementing.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a counter
    async fn increment(&self, key: &CacheKey, window: Duration) -> AppResult<u64>;

    /// Add a member to a set and reset the set's TTL
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a set
    async fn set_add(&self, key: &CacheKey, member: &str, ttl: Duration) -> AppResult<()>;

    /// List members of a set (empty when absent)
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a set
    async fn set_members(&self, key: &CacheKey) -> AppResult<Vec<String>>;

    /// Remove a member from a set
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a set
    async fn set_remove(&self, key: &CacheKey, member: &str) -> AppResult<()>;

    /// Remove single cache entry
    ///
    /// # Errors
    ///
    /// Returns an error if invalidation fails
    async fn invalidate(&self, key: &CacheKey) -> AppResult<()>;

    /// Remove all cache entries matching a glob pattern (e.g. `"session:*"`)
    ///
    /// # Errors
    ///
    /// Returns an error if pattern invalidation fails
    async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64>;

    /// Check if key exists in cache
    ///
    /// # Errors
    ///
    /// Returns an error if existence check fails
    async fn exists(&self, key: &CacheKey) -> AppResult<bool>;

    /// Get remaining TTL for key
    ///
    /// # Errors
    ///
    /// Returns an error if TTL check fails
    async fn ttl(&self, key: &CacheKey) -> AppResult<Option<Duration>>;

    /// Verify cache backend is healthy
    ///
    /// # Errors
    ///
    /// Returns an error if health check fails
    async fn health_check(&self) -> AppResult<()>;

    /// Clear all cache entries (for testing/admin)
    ///
    /// # Errors
    ///
    /// Returns an error if clear operation fails
    async fn clear_all(&self) -> AppResult<()>;
}

/// Structured cache key, one variant per kind of ephemeral auth state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Revocation marker for one token id
    RevokedToken {
        /// Token id (`jti`)
        token_id: String,
    },
    /// Revocation marker for a whole refresh family
    RevokedFamily {
        /// Session id shared by every token of the family
        session_id: String,
    },
    /// Current generation record of a refresh family
    Session {
        /// Session id
        session_id: String,
    },
    /// Index of a user's live session ids
    UserSessions {
        /// Owning user
        user_id: Id,
    },
    /// Failure counter within the current window
    RateFailures {
        /// Throttling scope, e.g. `login:subject:alice@example.com`
        scope: String,
    },
    /// Active lockout marker
    RateLockout {
        /// Throttling scope
        scope: String,
    },
    /// Consecutive lockouts, drives geometric backoff
    RateLevel {
        /// Throttling scope
        scope: String,
    },
    /// Per-IP attempt counter across every account and action
    IpAttempts {
        /// Client IP
        ip: String,
    },
    /// Marker armed at issuance and consumed on first use
    SingleUse {
        /// Token kind the marker belongs to
        purpose: String,
        /// Token id (`jti`)
        token_id: String,
    },
    /// A TOTP time step already accepted for a user
    TotpStepUsed {
        /// User the code belonged to
        user_id: Id,
        /// RFC 6238 counter value
        step: u64,
    },
    /// Pointer to the one live token of an API key
    ApiKeyCurrent {
        /// API key id
        key_id: Id,
    },
}

impl CacheKey {
    /// Pattern matching every session record
    #[must_use]
    pub const fn session_pattern() -> &'static str {
        "session:*"
    }

    /// Pattern matching every throttling entry of a scope
    #[must_use]
    pub fn rate_scope_pattern(scope: &str) -> String {
        format!("rate:*:{scope}")
    }

    /// Revocation and lockout markers; bounded backends hold capacity back for these
    #[must_use]
    pub const fn is_enforcement_marker(&self) -> bool {
        matches!(
            self,
            Self::RevokedToken { .. }
                | Self::RevokedFamily { .. }
                | Self::RateLockout { .. }
                | Self::RateLevel { .. }
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RevokedToken { token_id } => write!(f, "revoked:token:{token_id}"),
            Self::RevokedFamily { session_id } => write!(f, "revoked:family:{session_id}"),
            Self::Session { session_id } => write!(f, "session:{session_id}"),
            Self::UserSessions { user_id } => write!(f, "user_sessions:{user_id}"),
            Self::RateFailures { scope } => write!(f, "rate:failures:{scope}"),
            Self::RateLockout { scope } => write!(f, "rate:lockout:{scope}"),
            Self::RateLevel { scope } => write!(f, "rate:level:{scope}"),
            Self::IpAttempts { ip } => write!(f, "rate:ip:{ip}"),
            Self::SingleUse { purpose, token_id } => write!(f, "single_use:{purpose}:{token_id}"),
            Self::TotpStepUsed { user_id, step } => write!(f, "totp_used:{user_id}:{step}"),
            Self::ApiKeyCurrent { key_id } => write!(f, "apikey:current:{key_id}"),
        }
    }
}

/// Clamp a TTL to at least one millisecond so backends never receive zero
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
