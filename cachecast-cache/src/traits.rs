//! Key/value store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Backing key/value store with TTL, set membership and optional pub/sub.
///
/// Keys passed in are logical keys; implementations apply their own
/// namespacing.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the raw bytes stored under a key.
    ///
    /// # Returns
    ///
    /// Returns `Err(CacheError::NotFound)` if the key is absent or expired.
    /// Any other error means the store itself failed.
    async fn get(&self, key: &str) -> CacheResult<Bytes>;

    /// Store bytes under a key with a time-to-live.
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Delete every key matching a glob pattern (`*`, `?`, `[...]`).
    ///
    /// # Returns
    ///
    /// The number of keys removed.
    async fn delete_by_pattern(&self, pattern: &str) -> CacheResult<usize>;

    /// List the live keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Add a member to the set stored at `set_key`, creating it if needed.
    async fn set_add(&self, set_key: &str, member: &str) -> CacheResult<()>;

    /// Get all members of a set. An absent set has no members.
    async fn set_members(&self, set_key: &str) -> CacheResult<Vec<String>>;

    /// Set or update the expiration time for a key.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()>;

    /// Remove the expiration from a key.
    async fn persist(&self, key: &str) -> CacheResult<()>;

    /// Get the remaining time-to-live of a key.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if the key has no expiration or does not exist.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key in the store's namespace.
    ///
    /// **Warning:** This operation affects all keys.
    async fn clear(&self) -> CacheResult<()>;

    /// Publish a payload on a store pub/sub channel.
    ///
    /// Stores without pub/sub accept and drop the message.
    ///
    /// # Returns
    ///
    /// The number of receivers reached.
    async fn publish(&self, channel: &str, payload: &str) -> CacheResult<usize> {
        let _ = (channel, payload);
        Ok(0)
    }

    /// Delete several keys.
    ///
    /// # Returns
    ///
    /// The number of keys passed in.
    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.delete(key));
        try_join_all(futures).await?;
        Ok(keys.len())
    }
}
