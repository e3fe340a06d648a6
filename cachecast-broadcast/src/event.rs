//! Event envelope exchanged with subscribers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Well-known event types.
pub mod event_types {
    /// One or more cache entries were removed.
    pub const CACHE_INVALIDATED: &str = "cache_invalidated";
    /// A refresh-ahead schedule republished an entry.
    pub const ENTRY_REFRESHED: &str = "entry_refreshed";
    /// A write-through reached both the source of truth and the cache.
    pub const WRITE_COMMITTED: &str = "write_committed";
    /// Sent to a subscriber right after it registers.
    pub const CONNECTION: &str = "connection";
}

/// An event envelope: `{ "type", "data", "timestamp" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, one of [`event_types`] or a caller-defined name
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque payload
    pub data: Value,
    /// When the event was created
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event stamped with the current time.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// A `cache_invalidated` event for a single key.
    pub fn key_invalidated(key: &str) -> Self {
        Self::new(event_types::CACHE_INVALIDATED, json!({ "key": key }))
    }

    /// A `cache_invalidated` event for a tag group.
    pub fn tag_invalidated(tag: &str, removed: usize) -> Self {
        Self::new(
            event_types::CACHE_INVALIDATED,
            json!({ "tag": tag, "removed": removed }),
        )
    }

    /// A `cache_invalidated` event for a key pattern.
    pub fn pattern_invalidated(pattern: &str, removed: usize) -> Self {
        Self::new(
            event_types::CACHE_INVALIDATED,
            json!({ "pattern": pattern, "removed": removed }),
        )
    }

    /// A `cache_invalidated` event covering the whole namespace.
    pub fn all_invalidated() -> Self {
        Self::new(event_types::CACHE_INVALIDATED, json!({ "scope": "all" }))
    }

    /// An `entry_refreshed` event.
    pub fn entry_refreshed(key: &str) -> Self {
        Self::new(event_types::ENTRY_REFRESHED, json!({ "key": key }))
    }

    /// A `write_committed` event.
    pub fn write_committed(key: &str) -> Self {
        Self::new(event_types::WRITE_COMMITTED, json!({ "key": key }))
    }

    /// The greeting sent to newly registered subscribers.
    pub fn connection(subscriber_id: &str) -> Self {
        Self::new(
            event_types::CONNECTION,
            json!({ "status": "connected", "subscriber": subscriber_id }),
        )
    }

    /// Check the event type.
    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    /// Encode the envelope as JSON bytes.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Decode an envelope from JSON bytes.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
