//! Cache configuration types.

use crate::error::{CacheError, CacheResult};
use crate::ttl::TtlPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Connection URL
    pub url: String,

    /// Key prefix for all cache keys
    pub key_prefix: Option<String>,

    /// TTL used when a caller does not pick one
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,

    /// How long before expiry refresh-ahead entries are republished
    #[serde(with = "duration_secs")]
    pub refresh_lead_time: Duration,

    /// Connection timeout
    #[serde(with = "duration_millis")]
    pub connection_timeout: Duration,

    /// Operation timeout
    #[serde(with = "duration_millis")]
    pub operation_timeout: Duration,

    /// Store pub/sub channel that mirrors invalidation events
    pub event_channel: Option<String>,

    /// TTLs by kind of data
    pub ttl_policy: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: None,
            default_ttl: Duration::from_secs(5 * 60),
            refresh_lead_time: Duration::from_secs(10 * 60),
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(3),
            event_channel: None,
            ttl_policy: TtlPolicy::standard(),
        }
    }
}

impl CacheConfig {
    /// Create a new Redis cache configuration.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Examples
    ///
    /// ```
    /// use cachecast_cache::CacheConfig;
    ///
    /// let config = CacheConfig::redis("redis://localhost:6379").unwrap();
    /// ```
    pub fn redis(url: impl Into<String>) -> CacheResult<Self> {
        let url = url.into();
        let supported = ["redis://", "rediss://", "unix://", "redis+unix://"];
        if !supported.iter().any(|scheme| url.starts_with(scheme)) {
            return Err(CacheError::Config(format!("unsupported Redis URL: {url}")));
        }

        Ok(Self {
            url,
            ..Self::default()
        })
    }

    /// Load configuration from `CACHECAST_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed numbers are an error.
    pub fn from_env() -> CacheResult<Self> {
        let mut config = match env::var("CACHECAST_REDIS_URL") {
            Ok(url) => Self::redis(url)?,
            Err(_) => Self::default(),
        };

        if let Ok(prefix) = env::var("CACHECAST_KEY_PREFIX") {
            if !prefix.is_empty() {
                config.key_prefix = Some(prefix);
            }
        }
        if let Some(secs) = env_u64("CACHECAST_DEFAULT_TTL_SECS")? {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CACHECAST_REFRESH_LEAD_SECS")? {
            config.refresh_lead_time = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("CACHECAST_OPERATION_TIMEOUT_MS")? {
            config.operation_timeout = Duration::from_millis(ms);
        }
        if let Ok(channel) = env::var("CACHECAST_EVENT_CHANNEL") {
            if !channel.is_empty() {
                config.event_channel = Some(channel);
            }
        }

        Ok(config)
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the refresh-ahead lead time.
    pub fn with_refresh_lead_time(mut self, lead_time: Duration) -> Self {
        self.refresh_lead_time = lead_time;
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Mirror invalidation events to a store pub/sub channel.
    pub fn with_event_channel(mut self, channel: impl Into<String>) -> Self {
        self.event_channel = Some(channel.into());
        self
    }

    /// Replace the TTL policy.
    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl_policy = policy;
        self
    }

    /// Build the final key with prefix if configured.
    pub fn build_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    /// Strip the configured prefix from a stored key.
    pub fn strip_key<'a>(&self, key: &'a str) -> &'a str {
        match &self.key_prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .unwrap_or(key),
            None => key,
        }
    }
}

fn env_u64(name: &str) -> CacheResult<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CacheError::Config(format!("{name} must be a number, got '{raw}'"))),
        Err(_) => Ok(None),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config() {
        let config = CacheConfig::redis("redis://localhost:6379").unwrap();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.default_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let err = CacheConfig::redis("memcache://localhost:11211").unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::redis("redis://localhost:6379")
            .unwrap()
            .with_key_prefix("app")
            .with_default_ttl(Duration::from_secs(60))
            .with_refresh_lead_time(Duration::from_secs(10))
            .with_event_channel("cache_events");

        assert_eq!(config.key_prefix, Some("app".to_string()));
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.refresh_lead_time, Duration::from_secs(10));
        assert_eq!(config.event_channel.as_deref(), Some("cache_events"));
    }

    #[test]
    fn test_build_key_with_prefix() {
        let config = CacheConfig::default().with_key_prefix("myapp");

        assert_eq!(config.build_key("user:123"), "myapp:user:123");
        assert_eq!(config.strip_key("myapp:user:123"), "user:123");
    }

    #[test]
    fn test_build_key_without_prefix() {
        let config = CacheConfig::default();
        assert_eq!(config.build_key("user:123"), "user:123");
        assert_eq!(config.strip_key("user:123"), "user:123");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"key_prefix": "shop", "default_ttl": 120, "operation_timeout": 250}"#,
        )
        .unwrap();

        assert_eq!(config.key_prefix.as_deref(), Some("shop"));
        assert_eq!(config.default_ttl, Duration::from_secs(120));
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.url, "redis://localhost:6379");
    }
}
