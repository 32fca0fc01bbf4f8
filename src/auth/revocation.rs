// ABOUTME: Registry of revoked token ids and session families backed by the ephemeral cache
// ABOUTME: Entries expire with the token they revoke so the registry prunes itself
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::codec::Claims;
use crate::cache::{Cache, CacheKey, CacheProvider};
use crate::errors::AppResult;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

/// Storage for revocation markers
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record that `key` is revoked for `ttl`
    async fn mark(&self, key: CacheKey, ttl: std::time::Duration) -> AppResult<()>;

    /// Whether `key` is currently marked
    async fn is_marked(&self, key: &CacheKey) -> AppResult<bool>;
}

#[async_trait]
impl RevocationStore for Cache {
    async fn mark(&self, key: CacheKey, ttl: std::time::Duration) -> AppResult<()> {
        self.set(&key, &true, ttl).await
    }

    async fn is_marked(&self, key: &CacheKey) -> AppResult<bool> {
        self.exists(key).await
    }
}

/// Tracks tokens that are cryptographically valid but logically dead
#[derive(Clone)]
pub struct RevocationRegistry {
    store: Arc<dyn RevocationStore>,
}

impl RevocationRegistry {
    /// Create a registry over any store
    #[must_use]
    pub fn new(store: Arc<dyn RevocationStore>) -> Self {
        Self { store }
    }

    /// Revoke a token id for `ttl`; a non-positive `ttl` is a no-op since the token is already dead
    ///
    /// # Errors
    ///
    /// Returns a cache error if the marker cannot be written
    pub async fn revoke(&self, token_id: &str, ttl: Duration) -> AppResult<()> {
        let Some(ttl) = positive(ttl) else {
            return Ok(());
        };
        debug!(jti = %token_id, ttl_secs = ttl.as_secs(), "revoking token");
        self.store
            .mark(
                CacheKey::RevokedToken {
                    token_id: token_id.to_owned(),
                },
                ttl,
            )
            .await
    }

    /// Revoke a verified token for the rest of its lifetime
    ///
    /// # Errors
    ///
    /// Returns a cache error if the marker cannot be written
    pub async fn revoke_claims(&self, claims: &Claims) -> AppResult<()> {
        self.revoke(&claims.jti, claims.remaining()).await
    }

    /// Whether a token id was revoked
    ///
    /// # Errors
    ///
    /// Returns a cache error if the lookup fails
    pub async fn is_revoked(&self, token_id: &str) -> AppResult<bool> {
        self.store
            .is_marked(&CacheKey::RevokedToken {
                token_id: token_id.to_owned(),
            })
            .await
    }

    /// Revoke every token of a session family
    ///
    /// # Errors
    ///
    /// Returns a cache error if the marker cannot be written
    pub async fn revoke_family(&self, session_id: &str, ttl: Duration) -> AppResult<()> {
        let Some(ttl) = positive(ttl) else {
            return Ok(());
        };
        debug!(session_id = %session_id, "revoking session family");
        self.store
            .mark(
                CacheKey::RevokedFamily {
                    session_id: session_id.to_owned(),
                },
                ttl,
            )
            .await
    }

    /// Whether a session family was revoked
    ///
    /// # Errors
    ///
    /// Returns a cache error if the lookup fails
    pub async fn is_family_revoked(&self, session_id: &str) -> AppResult<bool> {
        self.store
            .is_marked(&CacheKey::RevokedFamily {
                session_id: session_id.to_owned(),
            })
            .await
    }

    /// Whether this token, or the family it belongs to, was revoked
    ///
    /// # Errors
    ///
    /// Returns a cache error if a lookup fails
    pub async fn is_claims_revoked(&self, claims: &Claims) -> AppResult<bool> {
        if self.is_revoked(&claims.jti).await? {
            return Ok(true);
        }
        match &claims.sid {
            Some(session_id) => self.is_family_revoked(session_id).await,
            None => Ok(false),
        }
    }
}

fn positive(ttl: Duration) -> Option<std::time::Duration> {
    ttl.to_std().ok().filter(|ttl| !ttl.is_zero())
}
