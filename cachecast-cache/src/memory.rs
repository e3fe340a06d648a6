//! In-process key/value store.

use crate::error::{CacheError, CacheResult};
use crate::traits::KeyValueStore;
use async_trait::async_trait;
use bytes::Bytes;
use globset::{Glob, GlobMatcher};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio::time::Instant;

/// A message published through [`InMemoryStore::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMessage {
    /// Channel name
    pub channel: String,
    /// Message payload
    pub payload: String,
}

/// In-memory store for tests and single-process deployments.
///
/// Expiry follows `tokio::time`, so paused-clock tests can fast-forward TTLs.
#[derive(Clone)]
pub struct InMemoryStore {
    data: Arc<RwLock<HashMap<String, StoreEntry>>>,
    messages: broadcast::Sender<StoreMessage>,
}

#[derive(Clone)]
struct StoreEntry {
    value: StoreValue,
    expires_at: Option<Instant>,
}

#[derive(Clone)]
enum StoreValue {
    Bytes(Bytes),
    Set(HashSet<String>),
}

/// Deadline `ttl` from `now`; `None` (no expiry) if it is past the clock's range.
fn deadline(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}

impl StoreEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

impl InMemoryStore {
    /// Create new in-memory store
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(256);
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            messages,
        }
    }

    /// Receive messages published on any channel from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreMessage> {
        self.messages.subscribe()
    }

    /// Number of live keys, sets included.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Check whether the store holds no live keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) -> usize {
        let mut data = self.data.write().await;
        let now = Instant::now();
        let before = data.len();
        data.retain(|_, entry| entry.is_live(now));
        before - data.len()
    }

    fn matcher(pattern: &str) -> CacheResult<GlobMatcher> {
        Glob::new(pattern)
            .map(|glob| glob.compile_matcher())
            .map_err(|e| CacheError::Config(format!("invalid key pattern '{pattern}': {e}")))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Bytes> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => match &entry.value {
                StoreValue::Bytes(bytes) => Ok(bytes.clone()),
                StoreValue::Set(_) => Err(CacheError::StoreUnavailable(format!(
                    "WRONGTYPE key '{key}' holds a set"
                ))),
            },
            _ => Err(CacheError::NotFound(key.to_string())),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let entry = StoreEntry {
            value: StoreValue::Bytes(value),
            expires_at: deadline(Instant::now(), ttl),
        };
        self.data.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let matcher = Self::matcher(pattern)?;
        let mut data = self.data.write().await;
        let now = Instant::now();
        let before = data.len();
        let mut expired = 0;
        data.retain(|key, entry| {
            if !matcher.is_match(key) {
                return true;
            }
            if !entry.is_live(now) {
                expired += 1;
            }
            false
        });
        Ok(before - data.len() - expired)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let matcher = Self::matcher(pattern)?;
        let data = self.data.read().await;
        let now = Instant::now();
        Ok(data
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && matcher.is_match(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn set_add(&self, set_key: &str, member: &str) -> CacheResult<()> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        let entry = data
            .entry(set_key.to_string())
            .and_modify(|entry| {
                if !entry.is_live(now) {
                    *entry = StoreEntry {
                        value: StoreValue::Set(HashSet::new()),
                        expires_at: None,
                    };
                }
            })
            .or_insert_with(|| StoreEntry {
                value: StoreValue::Set(HashSet::new()),
                expires_at: None,
            });

        match &mut entry.value {
            StoreValue::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            StoreValue::Bytes(_) => Err(CacheError::StoreUnavailable(format!(
                "WRONGTYPE key '{set_key}' does not hold a set"
            ))),
        }
    }

    async fn set_members(&self, set_key: &str) -> CacheResult<Vec<String>> {
        let data = self.data.read().await;
        match data.get(set_key) {
            Some(entry) if entry.is_live(Instant::now()) => match &entry.value {
                StoreValue::Set(members) => Ok(members.iter().cloned().collect()),
                StoreValue::Bytes(_) => Err(CacheError::StoreUnavailable(format!(
                    "WRONGTYPE key '{set_key}' does not hold a set"
                ))),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        if let Some(entry) = data.get_mut(key) {
            if entry.is_live(now) {
                entry.expires_at = deadline(now, ttl);
            }
        }
        Ok(())
    }

    async fn persist(&self, key: &str) -> CacheResult<()> {
        let mut data = self.data.write().await;
        if let Some(entry) = data.get_mut(key) {
            if entry.is_live(Instant::now()) {
                entry.expires_at = None;
            }
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let data = self.data.read().await;
        let now = Instant::now();
        Ok(data
            .get(key)
            .and_then(|entry| entry.expires_at)
            .filter(|expires_at| *expires_at > now)
            .map(|expires_at| expires_at - now))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .is_some_and(|entry| entry.is_live(Instant::now())))
    }

    async fn clear(&self) -> CacheResult<()> {
        self.data.write().await.clear();
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> CacheResult<usize> {
        let message = StoreMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        // No receivers is not an error for pub/sub.
        Ok(self.messages.send(message).unwrap_or(0))
    }
}
