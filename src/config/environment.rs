// ABOUTME: Environment-based server configuration for the auth service
// ABOUTME: Aggregates HTTP, database, cache, auth, rate guard, and logging settings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-based configuration management for production deployment

use super::cache::CacheConfig;
use super::security::{parse_env_or, AuthConfig, RateGuardConfig};
use crate::constants::server;
use crate::errors::{AppError, AppResult};
use crate::logging::LoggingConfig;
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Where durable user records live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// `SQLite` database with file path
    SQLite {
        /// Path to the database file
        path: PathBuf,
    },
    /// In-memory `SQLite` (for testing)
    SQLiteMemory,
    /// Process-local map store, nothing persisted
    InProcess,
}

impl DatabaseUrl {
    /// Parse from string with validation
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is empty or uses an unsupported scheme
    pub fn parse_url(s: &str) -> AppResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AppError::config("DATABASE_URL must not be empty"));
        }
        if trimmed == "memory" {
            return Ok(Self::InProcess);
        }
        if let Some(path) = trimmed.strip_prefix("sqlite:") {
            let path = path.trim_start_matches("//");
            return Ok(if path == ":memory:" {
                Self::SQLiteMemory
            } else {
                Self::SQLite {
                    path: PathBuf::from(path),
                }
            });
        }
        if trimmed.contains("://") {
            return Err(AppError::config(format!(
                "Unsupported DATABASE_URL scheme in '{trimmed}'"
            )));
        }
        // Fallback: treat as SQLite file path
        Ok(Self::SQLite {
            path: PathBuf::from(trimmed),
        })
    }

    /// Convert to a sqlx connection string, `None` for the in-process store
    #[must_use]
    pub fn to_connection_string(&self) -> Option<String> {
        match self {
            Self::SQLite { path } => Some(format!("sqlite:{}?mode=rwc", path.display())),
            Self::SQLiteMemory => Some("sqlite::memory:".to_owned()),
            Self::InProcess => None,
        }
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SQLite { path } => write!(f, "SQLite ({})", path.display()),
            Self::SQLiteMemory => write!(f, "SQLite (in-memory)"),
            Self::InProcess => write!(f, "in-process"),
        }
    }
}

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP API port
    pub http_port: u16,
    /// Request deadline in seconds
    pub request_timeout_secs: u64,
    /// User store location
    pub database: DatabaseUrl,
    /// Ephemeral cache backend
    pub cache: CacheConfig,
    /// Token and login policy
    pub auth: AuthConfig,
    /// Throttling thresholds
    pub rate_guard: RateGuardConfig,
    /// Logging setup
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but invalid
    pub fn from_env() -> AppResult<Self> {
        let database = env::var("DATABASE_URL")
            .map_or(Ok(DatabaseUrl::SQLiteMemory), |url| DatabaseUrl::parse_url(&url))?;

        Ok(Self {
            http_port: parse_env_or("HTTP_PORT", server::DEFAULT_HTTP_PORT)?,
            request_timeout_secs: parse_env_or(
                "REQUEST_TIMEOUT_SECS",
                server::DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            database,
            cache: CacheConfig::from_env(),
            auth: AuthConfig::from_env()?,
            rate_guard: RateGuardConfig::from_env()?,
            logging: LoggingConfig::from_env(),
        })
    }

    /// Human-readable summary for startup logs (no secrets)
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Gatehouse Configuration:\n\
             - HTTP Port: {}\n\
             - Request Timeout: {}s\n\
             - Database: {}\n\
             - Cache: {}\n\
             - Location Policy: {:?}\n\
             - Access/Refresh TTL: {}s/{}s\n\
             - Rate Guard: {} failures per {}s, {} per IP",
            self.http_port,
            self.request_timeout_secs,
            self.database,
            if self.cache.redis_url.is_some() {
                "Redis"
            } else {
                "in-memory"
            },
            self.auth.location_policy,
            self.auth.ttl.access_secs,
            self.auth.ttl.refresh_secs,
            self.rate_guard.max_failures,
            self.rate_guard.window_secs,
            self.rate_guard.ip_ceiling,
        )
    }
}
