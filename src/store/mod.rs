// ABOUTME: Durable user storage contract used by the auth components
// ABOUTME: In-process and SQLite implementations share one async trait
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Process-local user store
pub mod memory;
/// `SQLite` user store
pub mod sqlite;

pub use memory::InMemoryUserStore;
pub use sqlite::SqliteUserStore;

use crate::config::DatabaseUrl;
use crate::errors::AppResult;
use crate::models::{Id, User};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// User records owned by the identity store
///
/// Updates on an unknown id fail with `ResourceNotFound`.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user
    ///
    /// # Errors
    ///
    /// Returns `ResourceAlreadyExists` if the email is taken
    async fn create_user(&self, user: &User) -> AppResult<()>;

    /// Look up by id
    async fn get_user(&self, id: Id) -> AppResult<Option<User>>;

    /// Look up by normalized email
    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>>;

    /// Replace the password hash
    async fn update_password_hash(&self, id: Id, password_hash: &str) -> AppResult<()>;

    /// Mark the email as verified
    async fn mark_email_verified(&self, id: Id) -> AppResult<()>;

    /// Set or clear the TOTP secret
    async fn set_two_factor_secret(&self, id: Id, secret: Option<&str>) -> AppResult<()>;

    /// Turn the second factor requirement on or off
    async fn set_two_factor_enabled(&self, id: Id, enabled: bool) -> AppResult<()>;

    /// Replace the whole backup code set at once
    async fn replace_backup_codes(&self, id: Id, code_hashes: &[String]) -> AppResult<()>;

    /// Remove one backup code if still present; returns whether this call removed it
    ///
    /// Concurrent calls for the same hash see exactly one `true`.
    async fn consume_backup_code(&self, id: Id, code_hash: &str) -> AppResult<bool>;

    /// Record an approved fingerprint
    async fn add_known_fingerprint(&self, id: Id, fingerprint: &str) -> AppResult<()>;
}

/// Open the user store a database URL selects
///
/// # Errors
///
/// Returns a database error if the `SQLite` pool cannot be opened or migrated
pub async fn open(database: &DatabaseUrl) -> AppResult<Arc<dyn UserStore>> {
    match database.to_connection_string() {
        Some(url) => {
            info!(database = %database, "Opening SQLite user store");
            Ok(Arc::new(SqliteUserStore::connect(&url).await?))
        }
        None => {
            info!("Using in-process user store; nothing will be persisted");
            Ok(Arc::new(InMemoryUserStore::new()))
        }
    }
}
