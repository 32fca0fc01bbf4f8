// ABOUTME: Process-local user store on DashMap for tests and single-node development
// ABOUTME: Per-entry locking gives the same atomicity as the SQLite conditional statements
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::UserStore;
use crate::errors::{AppError, AppResult};
use crate::models::user::normalize_email;
use crate::models::{Id, User};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory user store
#[derive(Default)]
pub struct InMemoryUserStore {
    users: DashMap<Id, User>,
    // email -> id
    emails: DashMap<String, Id>,
}

impl InMemoryUserStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, id: Id, apply: F) -> AppResult<()>
    where
        F: FnOnce(&mut User),
    {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("User"))?;
        apply(&mut user);
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create_user(&self, user: &User) -> AppResult<()> {
        match self.emails.entry(normalize_email(&user.email)) {
            Entry::Occupied(_) => Err(AppError::already_exists(
                "An account with this email already exists",
            )),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
                self.users.insert(user.id, user.clone());
                Ok(())
            }
        }
    }

    async fn get_user(&self, id: Id) -> AppResult<Option<User>> {
        Ok(self.users.get(&id).map(|user| user.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let Some(id) = self.emails.get(&normalize_email(email)).map(|id| *id) else {
            return Ok(None);
        };
        self.get_user(id).await
    }

    async fn update_password_hash(&self, id: Id, password_hash: &str) -> AppResult<()> {
        self.update(id, |user| password_hash.clone_into(&mut user.password_hash))
    }

    async fn mark_email_verified(&self, id: Id) -> AppResult<()> {
        self.update(id, |user| user.email_verified = true)
    }

    async fn set_two_factor_secret(&self, id: Id, secret: Option<&str>) -> AppResult<()> {
        self.update(id, |user| user.two_factor_secret = secret.map(str::to_owned))
    }

    async fn set_two_factor_enabled(&self, id: Id, enabled: bool) -> AppResult<()> {
        self.update(id, |user| user.two_factor_enabled = enabled)
    }

    async fn replace_backup_codes(&self, id: Id, code_hashes: &[String]) -> AppResult<()> {
        self.update(id, |user| user.backup_code_hashes = code_hashes.to_vec())
    }

    async fn consume_backup_code(&self, id: Id, code_hash: &str) -> AppResult<bool> {
        let Some(mut user) = self.users.get_mut(&id) else {
            return Ok(false);
        };
        let before = user.backup_code_hashes.len();
        user.backup_code_hashes.retain(|hash| hash != code_hash);
        Ok(user.backup_code_hashes.len() < before)
    }

    async fn add_known_fingerprint(&self, id: Id, fingerprint: &str) -> AppResult<()> {
        self.update(id, |user| {
            if !user.knows_fingerprint(fingerprint) {
                user.known_fingerprints.push(fingerprint.to_owned());
            }
        })
    }
}
