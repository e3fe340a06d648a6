//! Redis store implementation.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::KeyValueStore;
use async_trait::async_trait;
use bytes::Bytes;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::future::Future;
use std::time::Duration;

const SCAN_BATCH: usize = 500;

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: CacheConfig,
}

impl RedisStore {
    /// Create a new Redis store instance.
    ///
    /// # Arguments
    ///
    /// * `config` - Cache configuration
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cachecast_cache::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), CacheError> {
    ///     let config = CacheConfig::redis("redis://localhost:6379")?;
    ///     let store = RedisStore::new(config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::Config(format!("invalid Redis URL: {e}")))?;

        let connection =
            tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| CacheError::StoreUnavailable("connection timed out".to_string()))??;

        tracing::info!(url = %config.url, "Connected to Redis");
        Ok(Self { connection, config })
    }

    /// Get the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Get the store configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Build the full key with prefix.
    fn build_key(&self, key: &str) -> String {
        self.config.build_key(key)
    }

    /// Run a command under the configured operation timeout.
    async fn timed<T, F>(&self, op: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, op).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::StoreUnavailable(format!(
                "operation timed out after {:?}",
                self.config.operation_timeout
            ))),
        }
    }

    /// Collect every full key matching a pattern using SCAN.
    async fn scan_keys(&self, full_pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .timed(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(full_pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn delete_full_keys(&self, keys: &[String]) -> CacheResult<usize> {
        let mut removed = 0;
        for chunk in keys.chunks(SCAN_BATCH) {
            let mut conn = self.connection.clone();
            let count: usize = self
                .timed(redis::cmd("DEL").arg(chunk).query_async(&mut conn))
                .await?;
            removed += count;
        }
        Ok(removed)
    }
}

/// Longest expiry sent to Redis, leaving room for the server to add its clock.
const MAX_EXPIRY_MILLIS: i64 = i64::MAX / 2;

fn millis(ttl: Duration) -> i64 {
    // Redis rejects a zero expiry.
    i64::try_from(ttl.as_millis())
        .unwrap_or(MAX_EXPIRY_MILLIS)
        .clamp(1, MAX_EXPIRY_MILLIS)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Bytes> {
        let full_key = self.build_key(key);
        let mut conn = self.connection.clone();

        let value: Option<Vec<u8>> = self.timed(conn.get(&full_key)).await?;
        value
            .map(Bytes::from)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        let _: () = self
            .timed(
                redis::cmd("SET")
                    .arg(&key)
                    .arg(value.as_ref())
                    .arg("PX")
                    .arg(millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        let _: () = self.timed(conn.del(&key)).await?;
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let keys = self.scan_keys(&self.build_key(pattern)).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.delete_full_keys(&keys).await
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let keys = self.scan_keys(&self.build_key(pattern)).await?;
        Ok(keys
            .iter()
            .map(|key| self.config.strip_key(key).to_string())
            .collect())
    }

    async fn set_add(&self, set_key: &str, member: &str) -> CacheResult<()> {
        let key = self.build_key(set_key);
        let mut conn = self.connection.clone();
        let _: () = self.timed(conn.sadd(&key, member)).await?;
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> CacheResult<Vec<String>> {
        let key = self.build_key(set_key);
        let mut conn = self.connection.clone();
        self.timed(conn.smembers(&key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        let _: () = self.timed(conn.pexpire(&key, millis(ttl))).await?;
        Ok(())
    }

    async fn persist(&self, key: &str) -> CacheResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        let _: () = self.timed(conn.persist(&key)).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        let ttl_millis: i64 = self.timed(conn.pttl(&key)).await?;

        match ttl_millis {
            -2 => Ok(None), // Key doesn't exist
            -1 => Ok(None), // Key has no expiration
            millis if millis > 0 => Ok(Some(Duration::from_millis(millis as u64))),
            _ => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        self.timed(conn.exists(&key)).await
    }

    async fn clear(&self) -> CacheResult<()> {
        match &self.config.key_prefix {
            // Only our namespace goes when sharing a database.
            Some(_) => {
                let keys = self.scan_keys(&self.build_key("*")).await?;
                self.delete_full_keys(&keys).await?;
            }
            None => {
                let mut conn = self.connection.clone();
                let _: () = self.timed(redis::cmd("FLUSHDB").query_async(&mut conn)).await?;
            }
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> CacheResult<usize> {
        let mut conn = self.connection.clone();
        let receivers: usize = self.timed(conn.publish(channel, payload)).await?;
        tracing::debug!(channel = %channel, receivers, "Published message");
        Ok(receivers)
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize> {
        let full_keys: Vec<String> = keys.iter().map(|key| self.build_key(key)).collect();
        if full_keys.is_empty() {
            return Ok(0);
        }
        self.delete_full_keys(&full_keys).await
    }
}
