// ABOUTME: Cache factory for configuration-based backend selection
// ABOUTME: Dispatches to the in-memory or Redis backend behind one concrete type
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::memory::InMemoryCache;
use super::redis::RedisCache;
use super::{CacheConfig, CacheKey, CacheProvider};
use crate::errors::AppResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Unified cache handle
///
/// `CacheProvider` has generic methods and cannot be a trait object, so the
/// backend is chosen once at startup and dispatched through this enum.
#[derive(Clone)]
pub enum Cache {
    /// Process-local LRU
    Memory(InMemoryCache),
    /// Shared Redis instance
    Redis(RedisCache),
}

macro_rules! dispatch {
    ($self:ident, $cache:ident => $call:expr) => {
        match $self {
            Self::Memory($cache) => $call,
            Self::Redis($cache) => $call,
        }
    };
}

impl Cache {
    /// Create a cache for the backend the configuration selects
    ///
    /// # Errors
    ///
    /// Returns an error if cache initialization fails
    pub async fn from_config(config: CacheConfig) -> AppResult<Self> {
        if config.redis_url.is_some() {
            info!("Initializing Redis cache backend");
            Ok(Self::Redis(RedisCache::new(config).await?))
        } else {
            info!(
                "Initializing in-memory cache (max entries: {})",
                config.max_entries
            );
            Ok(Self::Memory(InMemoryCache::new(config).await?))
        }
    }

    /// In-memory cache without the background sweeper, for tests and tools
    ///
    /// # Errors
    ///
    /// Returns an error if cache initialization fails
    pub async fn in_memory() -> AppResult<Self> {
        Self::from_config(CacheConfig {
            redis_url: None,
            enable_background_cleanup: false,
            ..CacheConfig::default()
        })
        .await
    }

    /// Backend name for logs and health output
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }
}

#[async_trait::async_trait]
impl CacheProvider for Cache {
    async fn new(config: CacheConfig) -> AppResult<Self> {
        Self::from_config(config).await
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<()> {
        dispatch!(self, cache => cache.set(key, value, ttl).await)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        dispatch!(self, cache => cache.get(key).await)
    }

    async fn set_if_absent<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<bool> {
        dispatch!(self, cache => cache.set_if_absent(key, value, ttl).await)
    }

    async fn take<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        dispatch!(self, cache => cache.take(key).await)
    }

    async fn compare_and_swap<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        expected: &T,
        new: &T,
        ttl: Duration,
    ) -> AppResult<bool> {
        dispatch!(self, cache => cache.compare_and_swap(key, expected, new, ttl).await)
    }

    async fn increment(&self, key: &CacheKey, window: Duration) -> AppResult<u64> {
        dispatch!(self, cache => cache.increment(key, window).await)
    }

    async fn set_add(&self, key: &CacheKey, member: &str, ttl: Duration) -> AppResult<()> {
        dispatch!(self, cache => cache.set_add(key, member, ttl).await)
    }

    async fn set_members(&self, key: &CacheKey) -> AppResult<Vec<String>> {
        dispatch!(self, cache => cache.set_members(key).await)
    }

    async fn set_remove(&self, key: &CacheKey, member: &str) -> AppResult<()> {
        dispatch!(self, cache => cache.set_remove(key, member).await)
    }

    async fn invalidate(&self, key: &CacheKey) -> AppResult<()> {
        dispatch!(self, cache => cache.invalidate(key).await)
    }

    async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64> {
        dispatch!(self, cache => cache.invalidate_pattern(pattern).await)
    }

    async fn exists(&self, key: &CacheKey) -> AppResult<bool> {
        dispatch!(self, cache => cache.exists(key).await)
    }

    async fn ttl(&self, key: &CacheKey) -> AppResult<Option<Duration>> {
        dispatch!(self, cache => cache.ttl(key).await)
    }

    async fn health_check(&self) -> AppResult<()> {
        dispatch!(self, cache => cache.health_check().await)
    }

    async fn clear_all(&self) -> AppResult<()> {
        dispatch!(self, cache => cache.clear_all().await)
    }
}
