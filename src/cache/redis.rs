// ABOUTME: Redis cache implementation with connection pooling and TTL support
// ABOUTME: Provides shared revocation, session, and counter state for multi-instance deployments
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::{ttl_millis, CacheConfig, CacheKey, CacheProvider};
use crate::config::RedisConnectionConfig;
use crate::constants::cache::CACHE_KEY_PREFIX;
use crate::errors::{AppError, AppResult};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

const COMPARE_AND_SWAP_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
";

const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Redis cache implementation with connection pooling
///
/// Uses Redis `ConnectionManager` for automatic reconnection and connection pooling.
/// All keys are prefixed with `CACHE_KEY_PREFIX` for namespace isolation.
/// Multi-step operations run as Lua scripts so they stay atomic across instances.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

fn cache_error(operation: &'static str) -> impl Fn(redis::RedisError) -> AppError {
    move |e| {
        error!("Redis {} operation failed: {}", operation, e);
        AppError::cache(format!("Cache error: {e}")).with_source(e)
    }
}

impl RedisCache {
    /// Create new Redis cache instance
    ///
    /// # Errors
    ///
    /// Returns an error if Redis connection fails
    async fn new_with_config(config: &CacheConfig) -> AppResult<Self> {
        let redis_url = config
            .redis_url
            .as_ref()
            .ok_or_else(|| AppError::config("Redis URL is required for Redis cache backend"))?;

        let conn_config = &config.redis_connection;

        info!(
            "Connecting to Redis (timeout={}s, response_timeout={}s, retries={})",
            conn_config.connection_timeout_secs,
            conn_config.response_timeout_secs,
            conn_config.initial_connection_retries
        );

        let client = redis::Client::open(redis_url.as_str())
            .map_err(|e| AppError::config(format!("Failed to create Redis client: {e}")))?;

        let manager = Self::connect_with_retry(&client, conn_config).await?;

        info!("Successfully connected to Redis");

        Ok(Self { manager })
    }

    /// Connect to Redis with exponential backoff retry on failure
    async fn connect_with_retry(
        client: &redis::Client,
        conn_config: &RedisConnectionConfig,
    ) -> AppResult<ConnectionManager> {
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(conn_config.connection_timeout_secs))
            .set_response_timeout(Duration::from_secs(conn_config.response_timeout_secs))
            .set_number_of_retries(conn_config.reconnection_retries)
            .set_exponent_base(conn_config.retry_exponent_base)
            .set_max_delay(conn_config.max_retry_delay_ms);

        let max_retries = conn_config.initial_connection_retries;
        let max_delay_ms = conn_config.max_retry_delay_ms;

        let mut last_error = None;
        let mut delay_ms = conn_config.initial_retry_delay_ms;

        for attempt in 0..=max_retries {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await {
                Ok(manager) => {
                    if attempt > 0 {
                        info!("Redis connection established after {} retries", attempt);
                    }
                    return Ok(manager);
                }
                Err(e) => {
                    if attempt < max_retries {
                        warn!(
                            "Redis connection attempt {}/{} failed, retrying in {}ms: {}",
                            attempt + 1,
                            max_retries + 1,
                            delay_ms,
                            e
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(max_delay_ms);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::cache(format!(
            "Failed to connect to Redis after {} attempts: {}",
            max_retries + 1,
            last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string())
        )))
    }

    /// Build full Redis key with namespace prefix
    fn build_key(key: &CacheKey) -> String {
        format!("{CACHE_KEY_PREFIX}{key}")
    }

    async fn delete_matching(&self, pattern: &str) -> AppResult<u64> {
        let mut conn = self.manager.clone();
        let mut count = 0u64;
        let mut cursor = 0u64;

        // SCAN is cursor-based and safe on large keyspaces, unlike KEYS
        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(cache_error("SCAN"))?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await.map_err(cache_error("DEL"))?;
                count += deleted;
            }

            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(count)
    }
}

#[async_trait::async_trait]
impl CacheProvider for RedisCache {
    async fn new(config: CacheConfig) -> AppResult<Self>
    where
        Self: Sized,
    {
        Self::new_with_config(&config).await
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<()> {
        let serialized = serde_json::to_vec(value)?;
        let mut conn = self.manager.clone();

        let _: () = conn
            .pset_ex(Self::build_key(key), serialized, ttl_millis(ttl))
            .await
            .map_err(cache_error("PSETEX"))?;

        Ok(())
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        let mut conn = self.manager.clone();

        let data: Option<Vec<u8>> = conn
            .get(Self::build_key(key))
            .await
            .map_err(cache_error("GET"))?;

        Ok(data
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    async fn set_if_absent<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<bool> {
        let serialized = serde_json::to_vec(value)?;
        let mut conn = self.manager.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::build_key(key))
            .arg(serialized)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(cache_error("SET NX"))?;

        Ok(reply.is_some())
    }

    async fn take<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        let mut conn = self.manager.clone();

        let data: Option<Vec<u8>> = redis::cmd("GETDEL")
            .arg(Self::build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(cache_error("GETDEL"))?;

        Ok(data
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    async fn compare_and_swap<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        expected: &T,
        new: &T,
        ttl: Duration,
    ) -> AppResult<bool> {
        let expected = serde_json::to_vec(expected)?;
        let new = serde_json::to_vec(new)?;
        let mut conn = self.manager.clone();

        let swapped: i64 = Script::new(COMPARE_AND_SWAP_SCRIPT)
            .key(Self::build_key(key))
            .arg(expected)
            .arg(new)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(cache_error("compare-and-swap"))?;

        Ok(swapped == 1)
    }

    async fn increment(&self, key: &CacheKey, window: Duration) -> AppResult<u64> {
        let mut conn = self.manager.clone();

        let count: u64 = Script::new(INCREMENT_SCRIPT)
            .key(Self::build_key(key))
            .arg(ttl_millis(window))
            .invoke_async(&mut conn)
            .await
            .map_err(cache_error("INCR"))?;

        Ok(count)
    }

    async fn set_add(&self, key: &CacheKey, member: &str, ttl: Duration) -> AppResult<()> {
        let redis_key = Self::build_key(key);
        let mut conn = self.manager.clone();

        let _: () = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(&redis_key)
            .arg(member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&redis_key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(cache_error("SADD"))?;

        Ok(())
    }

    async fn set_members(&self, key: &CacheKey) -> AppResult<Vec<String>> {
        let mut conn = self.manager.clone();

        let members: Vec<String> = conn
            .smembers(Self::build_key(key))
            .await
            .map_err(cache_error("SMEMBERS"))?;

        Ok(members)
    }

    async fn set_remove(&self, key: &CacheKey, member: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();

        let _: () = conn
            .srem(Self::build_key(key), member)
            .await
            .map_err(cache_error("SREM"))?;

        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> AppResult<()> {
        let mut conn = self.manager.clone();

        let _: () = conn
            .del(Self::build_key(key))
            .await
            .map_err(cache_error("DEL"))?;

        Ok(())
    }

    async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64> {
        // glob and Redis MATCH share wildcard syntax
        self.delete_matching(&format!("{CACHE_KEY_PREFIX}{pattern}"))
            .await
    }

    async fn exists(&self, key: &CacheKey) -> AppResult<bool> {
        let mut conn = self.manager.clone();

        let exists: bool = conn
            .exists(Self::build_key(key))
            .await
            .map_err(cache_error("EXISTS"))?;

        Ok(exists)
    }

    async fn ttl(&self, key: &CacheKey) -> AppResult<Option<Duration>> {
        let mut conn = self.manager.clone();

        let ttl_ms: i64 = redis::cmd("PTTL")
            .arg(Self::build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(cache_error("PTTL"))?;

        // -2: no key, -1: no expiry
        Ok(u64::try_from(ttl_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis))
    }

    async fn health_check(&self) -> AppResult<()> {
        let mut conn = self.manager.clone();

        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(cache_error("PING"))?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(AppError::cache(format!(
                "Cache error: unexpected PING response '{response}'"
            )))
        }
    }

    async fn clear_all(&self) -> AppResult<()> {
        // Only our prefix; the instance may be shared
        self.delete_matching(&format!("{CACHE_KEY_PREFIX}*"))
            .await
            .map(|_| ())
    }
}
