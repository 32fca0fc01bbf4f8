// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Environment-only configuration for server, auth, rate guard, and cache backends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Configuration module for Gatehouse
//!
//! All settings come from environment variables. Every struct has a `Default`
//! that is safe for tests and a `from_env()` used by the server binary.
//!
//! - **Environment**: top-level `ServerConfig`
//! - **Security**: token lifetimes, signing key, location policy, password hashing, rate guard
//! - **Cache**: in-memory or Redis backend selection

/// Cache backend configuration
pub mod cache;
/// Server configuration loaded from environment variables
pub mod environment;
/// Authentication and throttling configuration
pub mod security;

pub use cache::{CacheConfig, RedisConnectionConfig};
pub use environment::{DatabaseUrl, ServerConfig};
pub use security::{AuthConfig, LocationPolicy, PasswordHashConfig, RateGuardConfig, TokenTtlConfig};
