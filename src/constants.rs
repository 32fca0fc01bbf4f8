// ABOUTME: System-wide constants and configuration defaults for the gatehouse auth core
// ABOUTME: Token lifetimes, rate guard thresholds, cache sizing, and Redis connection defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Constants Module
//!
//! Defaults used when the corresponding environment variable is absent.

/// Service identity used in token claims and logs
pub mod service {
    /// Default `iss` claim for every signed token
    pub const DEFAULT_ISSUER: &str = "gatehouse";
    /// Default `aud` claim for every signed token
    pub const DEFAULT_AUDIENCE: &str = "gatehouse-api";
    /// Default TOTP issuer shown in authenticator apps
    pub const DEFAULT_TOTP_ISSUER: &str = "Gatehouse";
    /// Service name for structured logging
    pub const SERVICE_NAME: &str = "gatehouse";
}

/// Token lifetimes per token kind
pub mod token_ttl {
    /// Access token lifetime (15 minutes)
    pub const ACCESS_SECS: i64 = 15 * 60;
    /// Refresh token lifetime (30 days)
    pub const REFRESH_SECS: i64 = 30 * 24 * 60 * 60;
    /// Pending two-factor challenge lifetime (5 minutes)
    pub const TWO_FACTOR_SECS: i64 = 5 * 60;
    /// Location approval link lifetime (72 hours)
    pub const APPROVAL_SECS: i64 = 72 * 60 * 60;
    /// Impersonation grant lifetime (10 minutes)
    pub const IMPERSONATION_SECS: i64 = 10 * 60;
    /// Email verification link lifetime (24 hours)
    pub const EMAIL_VERIFY_SECS: i64 = 24 * 60 * 60;
    /// Password reset link lifetime (1 hour)
    pub const PASSWORD_RESET_SECS: i64 = 60 * 60;
    /// Default API key token lifetime (365 days)
    pub const API_KEY_SECS: i64 = 365 * 24 * 60 * 60;
    /// How long retired signing keys keep verifying tokens; covers the longest-lived kind
    pub const KEY_RETENTION_SECS: i64 = API_KEY_SECS;
}

/// Rate guard defaults
pub mod rate_guard {
    /// Failed attempts allowed before a lockout starts
    pub const MAX_FAILURES: u64 = 5;
    /// First lockout duration
    pub const BASE_LOCKOUT_SECS: u64 = 30;
    /// Upper bound for geometric lockout growth
    pub const MAX_LOCKOUT_SECS: u64 = 3600;
    /// Counting window for failures and per-IP attempts
    pub const WINDOW_SECS: u64 = 900;
    /// Attempts allowed from one IP within a window, across all accounts and actions
    pub const IP_CEILING: u64 = 100;
}

/// Password and backup code policy
pub mod credentials {
    /// Minimum password length accepted at registration and reset
    pub const MIN_PASSWORD_LEN: usize = 6;
    /// Minimum display name length
    pub const MIN_NAME_LEN: usize = 3;
    /// Number of backup codes per generated set
    pub const BACKUP_CODE_COUNT: usize = 10;
    /// Length of a normalized backup code
    pub const BACKUP_CODE_LEN: usize = 12;
    /// Characters per displayed group
    pub const BACKUP_CODE_GROUP_SIZE: usize = 4;
    /// Unambiguous alphabet (no 0/O, 1/I)
    pub const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    /// Argon2id memory cost in KiB for production hashing
    pub const ARGON2_MEMORY_KIB: u32 = 19 * 1024;
    /// Argon2id iterations
    pub const ARGON2_ITERATIONS: u32 = 2;
    /// Argon2id lanes
    pub const ARGON2_PARALLELISM: u32 = 1;
}

/// TOTP parameters (RFC 6238 defaults understood by every authenticator app)
pub mod totp {
    /// Code length
    pub const DIGITS: usize = 6;
    /// Time step in seconds
    pub const STEP_SECS: u64 = 30;
    /// Accepted drift in steps on either side of the current one
    pub const SKEW_STEPS: u8 = 1;
}

/// Cache sizing and Redis connection defaults
pub mod cache {
    /// Namespace prefix for every key written by this service
    pub const CACHE_KEY_PREFIX: &str = "gatehouse:";
    /// Default entry capacity for the in-memory backend
    pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100_000;
    /// Default interval of the expired-entry sweep
    pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;
}

/// Redis connection defaults
pub mod redis {
    /// Connection timeout
    pub const CONNECTION_TIMEOUT_SECS: u64 = 5;
    /// Per-command response timeout
    pub const RESPONSE_TIMEOUT_SECS: u64 = 3;
    /// Reconnection attempts after a dropped connection
    pub const RECONNECTION_RETRIES: usize = 5;
    /// Exponential backoff base
    pub const RETRY_EXPONENT_BASE: u64 = 2;
    /// Maximum delay between retries
    pub const MAX_RETRY_DELAY_MS: u64 = 5_000;
    /// Attempts for the initial connection at startup
    pub const INITIAL_CONNECTION_RETRIES: u32 = 3;
    /// First retry delay, doubled on each attempt
    pub const INITIAL_RETRY_DELAY_MS: u64 = 500;
}

/// HTTP server defaults
pub mod server {
    /// Default listen port
    pub const DEFAULT_HTTP_PORT: u16 = 8081;
    /// Request deadline; a request past it is aborted before any token is returned
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
    /// Maximum accepted request body
    pub const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;
}
