//! Tag-based and rule-based cache invalidation

use crate::error::CacheResult;
use crate::traits::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Prefix of the set entries holding tag membership.
pub const TAG_PREFIX: &str = "tag:";

/// Store key of the set backing `tag`.
pub fn tag_set_key(tag: &str) -> String {
    format!("{TAG_PREFIX}{tag}")
}

/// Tag membership kept as set entries inside the store itself.
///
/// Each tag lives under `tag:<name>` and carries its own TTL, kept at least as
/// long as the entries it lists.
pub struct TagIndex<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
}

impl<S: KeyValueStore + ?Sized> TagIndex<S> {
    /// Create a tag index over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Add `key` to every tag in `tags`.
    ///
    /// `entry_ttl` is the tagged entry's remaining lifetime; `None` means the
    /// entry never expires, in which case the tag sets are made persistent.
    pub async fn tag(
        &self,
        key: &str,
        tags: &[&str],
        entry_ttl: Option<Duration>,
    ) -> CacheResult<()> {
        for tag in tags {
            let set_key = tag_set_key(tag);
            let existed = self.store.exists(&set_key).await?;
            self.store.set_add(&set_key, key).await?;

            match entry_ttl {
                // Only ever extend, so earlier members keep their coverage.
                // An existing set without TTL is already persistent.
                Some(entry_ttl) => {
                    let extend = if existed {
                        self.store
                            .ttl(&set_key)
                            .await?
                            .is_some_and(|remaining| remaining < entry_ttl)
                    } else {
                        true
                    };
                    if extend {
                        self.store.expire(&set_key, entry_ttl).await?;
                    }
                }
                None => self.store.persist(&set_key).await?,
            }
        }
        Ok(())
    }

    /// Delete every key listed under `tag`, then the tag set itself.
    ///
    /// # Returns
    ///
    /// The keys that were listed under the tag.
    pub async fn invalidate(&self, tag: &str) -> CacheResult<Vec<String>> {
        let set_key = tag_set_key(tag);
        let keys = self.store.set_members(&set_key).await?;
        if keys.is_empty() {
            return Ok(keys);
        }

        self.store.delete_many(&keys).await?;
        self.store.delete(&set_key).await?;
        Ok(keys)
    }

    /// Get all keys with a specific tag
    pub async fn keys(&self, tag: &str) -> CacheResult<Vec<String>> {
        self.store.set_members(&tag_set_key(tag)).await
    }
}

impl<S: KeyValueStore + ?Sized> Clone for TagIndex<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

/// What a named invalidation removes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum InvalidationRule {
    /// Delete a single key
    Key(String),
    /// Delete every key matching a glob pattern
    Pattern(String),
    /// Delete every key in a tag group
    Tag(String),
}

/// Maps cache type names to the invalidation they trigger.
///
/// Names without a rule fall back to deleting the key of the same name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRules {
    rules: HashMap<String, InvalidationRule>,
}

impl InvalidationRules {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for the storefront data types.
    ///
    /// | Name | Rule |
    /// |---|---|
    /// | `bestsellers` | key `bestsellers` |
    /// | `recommendations` | pattern `recommendations:*` |
    /// | `flash-sales` | key `flash_sales` |
    /// | `profile` | pattern `profile:*` |
    pub fn standard() -> Self {
        Self::new()
            .with("bestsellers", InvalidationRule::Key("bestsellers".into()))
            .with(
                "recommendations",
                InvalidationRule::Pattern("recommendations:*".into()),
            )
            .with("flash-sales", InvalidationRule::Key("flash_sales".into()))
            .with("profile", InvalidationRule::Pattern("profile:*".into()))
    }

    /// Register or replace a rule.
    pub fn with(mut self, name: impl Into<String>, rule: InvalidationRule) -> Self {
        self.rules.insert(name.into(), rule);
        self
    }

    /// Register or replace a rule in place.
    pub fn insert(&mut self, name: impl Into<String>, rule: InvalidationRule) {
        self.rules.insert(name.into(), rule);
    }

    /// Get the rule registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&InvalidationRule> {
        self.rules.get(name)
    }

    /// Resolve `name` to a rule, falling back to a key rule for the name.
    pub fn resolve(&self, name: &str) -> InvalidationRule {
        self.rules
            .get(name)
            .cloned()
            .unwrap_or_else(|| InvalidationRule::Key(name.to_string()))
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rule is registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
