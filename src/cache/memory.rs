// ABOUTME: In-memory cache implementation with TTL support that refuses new keys at capacity instead of evicting
// ABOUTME: Includes background cleanup task for expired entries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::{ttl_millis, CacheConfig, CacheKey, CacheProvider};
use crate::errors::{AppError, AppResult};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// In-memory cache entry with expiration
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + Duration::from_millis(ttl_millis(ttl)),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at.checked_duration_since(Instant::now())
    }
}

type Store = LruCache<String, CacheEntry>;

/// One slot in this many is held back for revocation and lockout markers
const MARKER_RESERVE_DIVISOR: usize = 10;

/// In-memory cache with TTL expiry and background cleanup
///
/// Suitable for a single process only. Live entries are never evicted: a
/// dropped revocation marker or counter would stop being enforced. When full,
/// expired entries are purged and, if that frees nothing, the write is refused
/// with a cache error. The last tenth of capacity only admits revocation and
/// lockout markers, so a flood of counters cannot crowd them out.
#[derive(Clone)]
pub struct InMemoryCache {
    store: Arc<RwLock<Store>>,
    shutdown_tx: Option<Arc<tokio::sync::mpsc::Sender<()>>>,
}

impl InMemoryCache {
    const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
        Some(n) => n,
        None => unreachable!(),
    };

    /// Create new in-memory cache with optional background cleanup task
    fn new_with_config(config: &CacheConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_entries).unwrap_or(Self::DEFAULT_CACHE_CAPACITY);

        let store = Arc::new(RwLock::new(LruCache::new(capacity)));

        let shutdown_tx = if config.enable_background_cleanup {
            let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
            let store_clone = store.clone();
            let cleanup_interval = config.cleanup_interval;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            Self::cleanup_expired(&store_clone).await;
                        }
                        _ = shutdown_rx.recv() => {
                            debug!("Cache cleanup task received shutdown signal");
                            break;
                        }
                    }
                }
            });

            Some(Arc::new(shutdown_tx))
        } else {
            None
        };

        Self { store, shutdown_tx }
    }

    /// Remove all expired entries from cache
    async fn cleanup_expired(store: &Arc<RwLock<Store>>) {
        let mut store_guard = store.write().await;
        let removed = Self::purge_expired(&mut store_guard);
        drop(store_guard);
        if removed > 0 {
            debug!("Cleaned up {} expired cache entries", removed);
        }
    }

    fn purge_expired(store: &mut Store) -> usize {
        let expired_keys: Vec<String> = store
            .iter()
            .filter(|(_, v)| v.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired_keys {
            store.pop(key);
        }
        expired_keys.len()
    }

    /// Live entry for `key`, dropping it first if it has expired
    fn live<'a>(store: &'a mut Store, key: &str) -> Option<&'a CacheEntry> {
        if store.peek(key).is_some_and(CacheEntry::is_expired) {
            store.pop(key);
            return None;
        }
        store.get(key)
    }

    /// Entries a new key of this kind may join
    fn admission_limit(store: &Store, key: &CacheKey) -> usize {
        let capacity = store.cap().get();
        if key.is_enforcement_marker() {
            capacity
        } else {
            capacity - capacity.div_ceil(MARKER_RESERVE_DIVISOR)
        }
    }

    /// Write `entry`; a new key is refused rather than evicting a live one
    fn insert(store: &mut Store, key: &CacheKey, name: String, entry: CacheEntry) -> AppResult<()> {
        if !store.contains(&name) {
            let limit = Self::admission_limit(store, key);
            if store.len() >= limit {
                Self::purge_expired(store);
            }
            if store.len() >= limit {
                warn!(
                    key = %name,
                    entries = store.len(),
                    "In-memory cache full, refusing new entry"
                );
                return Err(AppError::cache("In-memory cache is at capacity"));
            }
        }
        store.put(name, entry);
        Ok(())
    }

    fn read_set(store: &mut Store, key: &str) -> AppResult<BTreeSet<String>> {
        Self::live(store, key).map_or_else(
            || Ok(BTreeSet::new()),
            |entry| Ok(serde_json::from_slice(&entry.data)?),
        )
    }
}

#[async_trait::async_trait]
impl CacheProvider for InMemoryCache {
    async fn new(config: CacheConfig) -> AppResult<Self> {
        Ok(Self::new_with_config(&config))
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<()> {
        let entry = CacheEntry::new(serde_json::to_vec(value)?, ttl);
        let mut store = self.store.write().await;
        Self::insert(&mut store, key, key.to_string(), entry)?;
        drop(store);
        Ok(())
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        let mut store = self.store.write().await;
        let value = Self::live(&mut store, &key.to_string())
            .map(|entry| serde_json::from_slice(&entry.data))
            .transpose()?;
        drop(store);
        Ok(value)
    }

    async fn set_if_absent<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<bool> {
        let entry = CacheEntry::new(serde_json::to_vec(value)?, ttl);
        let name = key.to_string();
        let mut store = self.store.write().await;
        if Self::live(&mut store, &name).is_some() {
            return Ok(false);
        }
        Self::insert(&mut store, key, name, entry)?;
        drop(store);
        Ok(true)
    }

    async fn take<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        let mut store = self.store.write().await;
        let taken = store.pop(&key.to_string());
        drop(store);
        match taken {
            Some(entry) if !entry.is_expired() => Ok(Some(serde_json::from_slice(&entry.data)?)),
            _ => Ok(None),
        }
    }

    async fn compare_and_swap<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        expected: &T,
        new: &T,
        ttl: Duration,
    ) -> AppResult<bool> {
        let expected = serde_json::to_vec(expected)?;
        let entry = CacheEntry::new(serde_json::to_vec(new)?, ttl);
        let name = key.to_string();
        let mut store = self.store.write().await;
        let matches = Self::live(&mut store, &name).is_some_and(|current| current.data == expected);
        if matches {
            Self::insert(&mut store, key, name, entry)?;
        }
        drop(store);
        Ok(matches)
    }

    async fn increment(&self, key: &CacheKey, window: Duration) -> AppResult<u64> {
        let name = key.to_string();
        let mut store = self.store.write().await;
        let (count, expires_at) = match Self::live(&mut store, &name) {
            Some(entry) => {
                let current: u64 = serde_json::from_slice(&entry.data).map_err(|e| {
                    AppError::cache(format!("Value at '{name}' is not a counter: {e}"))
                })?;
                (current.saturating_add(1), entry.expires_at)
            }
            None => (1, CacheEntry::new(Vec::new(), window).expires_at),
        };
        let entry = CacheEntry {
            data: serde_json::to_vec(&count)?,
            expires_at,
        };
        Self::insert(&mut store, key, name, entry)?;
        drop(store);
        Ok(count)
    }

    async fn set_add(&self, key: &CacheKey, member: &str, ttl: Duration) -> AppResult<()> {
        let name = key.to_string();
        let mut store = self.store.write().await;
        let mut members = Self::read_set(&mut store, &name)?;
        members.insert(member.to_owned());
        let entry = CacheEntry::new(serde_json::to_vec(&members)?, ttl);
        Self::insert(&mut store, key, name, entry)?;
        drop(store);
        Ok(())
    }

    async fn set_members(&self, key: &CacheKey) -> AppResult<Vec<String>> {
        let mut store = self.store.write().await;
        let members = Self::read_set(&mut store, &key.to_string())?;
        drop(store);
        Ok(members.into_iter().collect())
    }

    async fn set_remove(&self, key: &CacheKey, member: &str) -> AppResult<()> {
        let name = key.to_string();
        let mut store = self.store.write().await;
        let Some(entry) = Self::live(&mut store, &name) else {
            return Ok(());
        };
        let expires_at = entry.expires_at;
        let mut members: BTreeSet<String> = serde_json::from_slice(&entry.data)?;
        members.remove(member);
        if members.is_empty() {
            store.pop(&name);
        } else {
            let data = serde_json::to_vec(&members)?;
            Self::insert(&mut store, key, name, CacheEntry { data, expires_at })?;
        }
        drop(store);
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> AppResult<()> {
        self.store.write().await.pop(&key.to_string());
        Ok(())
    }

    async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64> {
        let glob_pattern = glob::Pattern::new(pattern)
            .map_err(|e| AppError::internal(format!("Invalid glob pattern '{pattern}': {e}")))?;

        let mut store = self.store.write().await;
        let keys_to_remove: Vec<String> = store
            .iter()
            .filter(|(k, _)| glob_pattern.matches(k))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &keys_to_remove {
            store.pop(key);
        }
        drop(store);

        Ok(keys_to_remove.len() as u64)
    }

    async fn exists(&self, key: &CacheKey) -> AppResult<bool> {
        let mut store = self.store.write().await;
        let exists = Self::live(&mut store, &key.to_string()).is_some();
        drop(store);
        Ok(exists)
    }

    async fn ttl(&self, key: &CacheKey) -> AppResult<Option<Duration>> {
        let store = self.store.read().await;
        // peek keeps LRU order untouched
        let ttl = store
            .peek(&key.to_string())
            .filter(|entry| !entry.is_expired())
            .and_then(CacheEntry::remaining_ttl);
        drop(store);
        Ok(ttl)
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }

    async fn clear_all(&self) -> AppResult<()> {
        self.store.write().await.clear();
        Ok(())
    }
}

impl Drop for InMemoryCache {
    fn drop(&mut self) {
        // Only the last handle stops the sweeper; clones share it
        if let Some(tx) = &self.shutdown_tx {
            if Arc::strong_count(tx) == 1 {
                if let Err(e) = tx.try_send(()) {
                    debug!(error = ?e, "Cache shutdown signal send failed (channel likely closed)");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: usize) -> InMemoryCache {
        InMemoryCache::new_with_config(&CacheConfig {
            max_entries,
            enable_background_cleanup: false,
            ..CacheConfig::default()
        })
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::RevokedToken {
            token_id: id.to_owned(),
        }
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let cache = cache(16);
        cache
            .set(&key("a"), &1_u32, Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get::<u32>(&key("a")).await.unwrap(), None);
        assert!(cache
            .set_if_absent(&key("a"), &2_u32, Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_counter_keeps_first_window() {
        let cache = cache(16);
        let k = CacheKey::IpAttempts {
            ip: "10.0.0.1".to_owned(),
        };
        assert_eq!(cache.increment(&k, Duration::from_secs(60)).await.unwrap(), 1);
        let first_ttl = cache.ttl(&k).await.unwrap().unwrap();
        assert_eq!(cache.increment(&k, Duration::from_secs(600)).await.unwrap(), 2);
        let second_ttl = cache.ttl(&k).await.unwrap().unwrap();
        assert!(second_ttl <= first_ttl);
    }

    fn counter(n: usize) -> CacheKey {
        CacheKey::IpAttempts {
            ip: format!("192.0.2.{n}"),
        }
    }

    #[tokio::test]
    async fn test_full_cache_refuses_instead_of_evicting() {
        let cache = cache(10);
        cache.set(&key("revoked"), &true, Duration::from_secs(60)).await.unwrap();

        // 10 slots, 1 held back for markers: 8 counters fit beside the marker
        for n in 0..8 {
            cache.increment(&counter(n), Duration::from_secs(60)).await.unwrap();
        }
        let err = cache
            .increment(&counter(99), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::CacheError);

        // Existing keys still update, and the marker survived
        assert_eq!(cache.increment(&counter(0), Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(cache.get::<bool>(&key("revoked")).await.unwrap(), Some(true));

        // The reserve still admits a revocation marker
        cache.set(&key("late"), &true, Duration::from_secs(60)).await.unwrap();
        assert!(cache.exists(&key("late")).await.unwrap());
        assert!(cache.exists(&key("revoked")).await.unwrap());
    }

    #[tokio::test]
    async fn test_full_cache_reclaims_expired_entries() {
        let cache = cache(4);
        for n in 0..3 {
            cache
                .set(&counter(n), &1_u64, Duration::from_millis(20))
                .await
                .unwrap();
        }
        assert!(cache.set(&counter(3), &1_u64, Duration::from_secs(60)).await.is_err());

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.set(&counter(3), &1_u64, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get::<u64>(&counter(3)).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_set_remove_drops_empty_set() {
        let cache = cache(16);
        let k = CacheKey::UserSessions {
            user_id: crate::models::Id::new(),
        };
        cache.set_add(&k, "s1", Duration::from_secs(60)).await.unwrap();
        cache.set_remove(&k, "s1").await.unwrap();
        assert!(!cache.exists(&k).await.unwrap());
    }
}
