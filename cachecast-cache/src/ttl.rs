//! TTL policy by data type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Maps a kind of cached data to how long it should live.
///
/// Stable data lives long, volatile data short. Kinds that are not
/// configured get the default TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TtlPolicyRepr", into = "TtlPolicyRepr")]
pub struct TtlPolicy {
    default_ttl: Duration,
    kinds: HashMap<String, Duration>,
}

impl TtlPolicy {
    /// Create an empty policy where every kind gets `default_ttl`.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            kinds: HashMap::new(),
        }
    }

    /// The storefront policy: catalogue data for an hour, flash sales for
    /// five minutes, carts for ten.
    pub fn standard() -> Self {
        Self::new(Duration::from_secs(5 * 60))
            .with("bestsellers", Duration::from_secs(60 * 60))
            .with("recommendations", Duration::from_secs(60 * 60))
            .with("flash_sales", Duration::from_secs(5 * 60))
            .with("user_profile", Duration::from_secs(30 * 60))
            .with("top_comments", Duration::from_secs(2 * 60 * 60))
            .with("cart", Duration::from_secs(10 * 60))
    }

    /// Set the TTL for a kind.
    pub fn with(mut self, kind: impl Into<String>, ttl: Duration) -> Self {
        self.kinds.insert(kind.into(), ttl);
        self
    }

    /// Set the fallback TTL.
    pub fn with_default(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Get the TTL for a kind, falling back to the default.
    pub fn ttl_for(&self, kind: &str) -> Duration {
        self.get(kind).unwrap_or(self.default_ttl)
    }

    /// Get the TTL configured for a kind, if any.
    pub fn get(&self, kind: &str) -> Option<Duration> {
        self.kinds.get(kind).copied()
    }

    /// Get the fallback TTL.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Serialize, Deserialize)]
struct TtlPolicyRepr {
    #[serde(default = "default_ttl_secs")]
    default_secs: u64,
    #[serde(default)]
    kinds: HashMap<String, u64>,
}

fn default_ttl_secs() -> u64 {
    5 * 60
}

impl From<TtlPolicyRepr> for TtlPolicy {
    fn from(repr: TtlPolicyRepr) -> Self {
        Self {
            default_ttl: Duration::from_secs(repr.default_secs),
            kinds: repr
                .kinds
                .into_iter()
                .map(|(kind, secs)| (kind, Duration::from_secs(secs)))
                .collect(),
        }
    }
}

impl From<TtlPolicy> for TtlPolicyRepr {
    fn from(policy: TtlPolicy) -> Self {
        Self {
            default_secs: policy.default_ttl.as_secs(),
            kinds: policy
                .kinds
                .into_iter()
                .map(|(kind, ttl)| (kind, ttl.as_secs()))
                .collect(),
        }
    }
}
