// ABOUTME: Dependency injection context for the auth core
// ABOUTME: Every component receives its collaborators through the context instead of globals
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Focused dependency injection context
//!
//! [`AuthContext`] is built once at startup from configuration, a cache, a
//! user store, and the external collaborators, then cloned into handlers.

pub mod auth;

pub use auth::{AuthContext, Collaborators};
