// ABOUTME: Role lookups consulted before elevated operations such as impersonation
// ABOUTME: The default authority reads the role recorded on the user in the user store
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::errors::AppResult;
use crate::models::{Id, UserRole};
use crate::store::UserStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Answers whether a user holds an elevated role
#[async_trait]
pub trait RoleAuthority: Send + Sync {
    /// Whether `user_id` may act on behalf of other users
    ///
    /// Unknown users are not elevated.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails
    async fn is_elevated(&self, user_id: Id) -> AppResult<bool>;
}

/// Reads roles from the user store
#[derive(Clone)]
pub struct StoreRoleAuthority {
    users: Arc<dyn UserStore>,
}

impl StoreRoleAuthority {
    /// Create over a user store
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Role of a user, if the user exists
    ///
    /// # Errors
    ///
    /// Returns a store error
    pub async fn role_of(&self, user_id: Id) -> AppResult<Option<UserRole>> {
        Ok(self.users.get_user(user_id).await?.map(|user| user.role))
    }
}

#[async_trait]
impl RoleAuthority for StoreRoleAuthority {
    async fn is_elevated(&self, user_id: Id) -> AppResult<bool> {
        Ok(self
            .role_of(user_id)
            .await?
            .is_some_and(UserRole::is_elevated))
    }
}
