// ABOUTME: Unified error taxonomy for the auth core with HTTP status mapping
// ABOUTME: AppError renders a uniform JSON body and never leaks which credential check failed
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Unified Error Handling System
//!
//! Every fallible operation in the crate returns [`AppResult`]. The [`ErrorCode`]
//! carries the taxonomy kind for programmatic handling, while the user-facing
//! message for credential and code failures is identical so callers cannot tell
//! an unknown account from a wrong password.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// Message shared by every failure that must not reveal account existence
const UNIFORM_AUTH_MESSAGE: &str = "Authentication failed";

/// Standard error codes used throughout the auth core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Authentication & Authorization (1000-1999)
    /// Identifier/password pair did not verify
    #[serde(rename = "INVALID_CREDENTIALS")]
    InvalidCredentials = 1000,
    /// Token signature, structure, kind, or expiry check failed
    #[serde(rename = "INVALID_TOKEN")]
    InvalidToken = 1001,
    /// Token is cryptographically valid but was revoked
    #[serde(rename = "REVOKED")]
    Revoked = 1002,
    /// Pending two-factor challenge is past its lifetime
    #[serde(rename = "CHALLENGE_EXPIRED")]
    ChallengeExpired = 1003,
    /// One-time or backup code did not match
    #[serde(rename = "INVALID_CODE")]
    InvalidCode = 1004,
    /// Caller lacks the role required for this operation
    #[serde(rename = "INSUFFICIENT_PERMISSION")]
    InsufficientPermission = 1005,
    /// Login from an unrecognized location awaits email approval
    #[serde(rename = "APPROVAL_PENDING")]
    ApprovalPending = 1006,

    // Rate Limiting (2000-2999)
    /// Too many attempts; see `retry_after_secs`
    #[serde(rename = "RATE_LIMITED")]
    RateLimited = 2000,

    // Validation (3000-3999)
    /// Request input failed validation
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput = 3000,

    // Resource Management (4000-4999)
    /// Requested resource does not exist
    #[serde(rename = "RESOURCE_NOT_FOUND")]
    ResourceNotFound = 4000,
    /// Resource with the same identity already exists
    #[serde(rename = "RESOURCE_ALREADY_EXISTS")]
    ResourceAlreadyExists = 4001,

    // Configuration (6000-6999)
    /// Configuration could not be loaded or is invalid
    #[serde(rename = "CONFIG_ERROR")]
    ConfigError = 6000,

    // Internal Errors (9000-9999)
    /// Unexpected internal failure
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError = 9000,
    /// Relational store failure
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError = 9001,
    /// Ephemeral cache failure
    #[serde(rename = "CACHE_ERROR")]
    CacheError = 9002,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::InvalidCredentials
            | Self::InvalidToken
            | Self::Revoked
            | Self::ChallengeExpired
            | Self::InvalidCode => 401,
            Self::InsufficientPermission | Self::ApprovalPending => 403,
            Self::ResourceNotFound => 404,
            Self::ResourceAlreadyExists => 409,
            Self::RateLimited => 429,
            Self::CacheError => 503,
            Self::InternalError | Self::DatabaseError | Self::ConfigError => 500,
        }
    }

    /// Get a user-facing description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::InvalidCredentials | Self::InvalidCode => UNIFORM_AUTH_MESSAGE,
            Self::InvalidToken | Self::Revoked => "The provided token is invalid",
            Self::ChallengeExpired => "The verification challenge has expired, please sign in again",
            Self::InsufficientPermission => "You do not have permission to perform this action",
            Self::ApprovalPending => {
                "Login from a new location must be approved via the link sent by email"
            }
            Self::RateLimited => "Too many attempts. Please wait before retrying",
            Self::InvalidInput => "The provided input is invalid",
            Self::ResourceNotFound => "The requested resource was not found",
            Self::ResourceAlreadyExists => "A resource with this identifier already exists",
            Self::ConfigError => "Configuration error encountered",
            Self::InternalError => "An internal server error occurred",
            Self::DatabaseError => "Database operation failed",
            Self::CacheError => "Cache operation failed",
        }
    }

    /// Whether this is a failed authentication attempt that counts toward throttling
    #[must_use]
    pub const fn is_auth_failure(self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::InvalidToken
                | Self::Revoked
                | Self::ChallengeExpired
                | Self::InvalidCode
                | Self::InsufficientPermission
        )
    }

    /// Whether the internal message may be shown to the caller
    ///
    /// Auth failures and infrastructure errors only ever expose `description()`.
    #[must_use]
    pub const fn exposes_message(self) -> bool {
        matches!(
            self,
            Self::InvalidInput | Self::ResourceNotFound | Self::ResourceAlreadyExists
        )
    }
}

/// Unified error type for the application
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Internal message, logged and shown only for validation-class errors
    pub message: String,
    /// Seconds until a rate-limited caller may retry
    pub retry_after_secs: Option<u64>,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_secs: None,
            source: None,
        }
    }

    /// Add a source error for error chaining
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Identifier/password mismatch (also used for unknown identifiers)
    pub fn invalid_credentials() -> Self {
        Self::new(ErrorCode::InvalidCredentials, "invalid credentials")
    }

    /// Token failed verification
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    /// Token was revoked
    pub fn revoked(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Revoked, message)
    }

    /// Too many attempts
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            retry_after_secs: Some(retry_after_secs.max(1)),
            ..Self::new(
                ErrorCode::RateLimited,
                format!("rate limited, retry after {retry_after_secs}s"),
            )
        }
    }

    /// Two-factor challenge expired
    pub fn challenge_expired() -> Self {
        Self::new(ErrorCode::ChallengeExpired, "two-factor challenge expired")
    }

    /// One-time or backup code mismatch
    pub fn invalid_code() -> Self {
        Self::new(ErrorCode::InvalidCode, "code did not verify")
    }

    /// Caller lacks the required role
    pub fn insufficient_permission(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InsufficientPermission, message)
    }

    /// Login is waiting on location approval
    pub fn approval_pending() -> Self {
        Self::new(ErrorCode::ApprovalPending, "login location awaiting approval")
    }

    /// Resource not found
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// Resource already exists
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceAlreadyExists, message)
    }

    /// Invalid input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheError, message)
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// HTTP error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable taxonomy kind
    pub code: ErrorCode,
    /// User-facing message
    pub message: String,
    /// Seconds until retry is allowed, for rate-limited responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        let message = if error.code.exposes_message() {
            error.message.clone()
        } else {
            error.code.description().to_owned()
        };
        Self {
            code: error.code,
            message,
            retry_after: error.retry_after_secs,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(code = ?self.code, error = %self.message, "request failed");
        } else {
            warn!(code = ?self.code, reason = %self.message, "request rejected");
        }

        let body = ErrorResponse::from(&self);
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        Self::database(format!("database operation failed: {error}")).with_source(error)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal(format!("serialization failed: {error}")).with_source(error)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.to_string())
    }
}
