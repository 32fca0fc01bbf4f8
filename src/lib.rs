// ABOUTME: Main library entry point for the gatehouse authentication core
// ABOUTME: Credential checks, two-factor, token lifecycle, API keys, impersonation, and throttling
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Gatehouse
//!
//! Authentication and authorization core for a multi-tenant SaaS backend.
//!
//! ## Components
//!
//! - **`SecretStore` / `TokenCodec`**: signing keys with rotation and the signed-token envelope
//! - **`RevocationRegistry`**: cache-backed token and session-family revocation
//! - **`RateGuard`**: failure counting, geometric lockout, and a per-IP ceiling
//! - **`CredentialVerifier` / `TwoFactorChallenge`**: password and one-time code checks
//! - **`SessionApprovalManager`**: new-location detection and email approval
//! - **`TokenService`**: access/refresh pairs with rotation and reuse detection
//! - **`ApiKeyTokenIssuer`** and **`ImpersonationService`**
//! - **`AuthOrchestrator`**: the public login, refresh, logout, and recovery flows
//!
//! Every component takes its collaborators through its constructor; there is no
//! global state beyond read-only configuration and key material.

/// Audit trail collaborator
pub mod audit;

/// Authentication components
pub mod auth;

/// Ephemeral key/value cache with in-memory and Redis backends
pub mod cache;

/// Environment-driven configuration
pub mod config;

/// Application constants and defaults
pub mod constants;

/// Dependency container wiring every component together
pub mod context;

/// Unified error handling
pub mod errors;

/// Logging configuration and initialization
pub mod logging;

/// Domain models
pub mod models;

/// Outbound email collaborator
pub mod notifications;

/// Role lookups used for elevated operations
pub mod permissions;

/// HTTP routing table
pub mod routes;

/// Durable user storage
pub mod store;
