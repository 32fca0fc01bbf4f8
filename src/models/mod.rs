// ABOUTME: Domain models for the auth core
// ABOUTME: Opaque identifiers and the user record shared by every component
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Opaque identifier with internal/external encodings
pub mod id;
/// User account record and role
pub mod user;

pub use id::Id;
pub use user::{User, UserRole};
