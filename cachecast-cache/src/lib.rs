//! Caching strategies and invalidation for cachecast.
//!
//! Sits in front of a slower source of truth and keeps a key/value store
//! populated using one of three strategies, announcing every change to
//! connected listeners.
//!
//! # Features
//!
//! - `redis` - Enable the Redis store (enabled by default)
//! - **Cache-aside** - Populate on miss, with concurrent misses collapsed
//!   into a single fetch
//! - **Write-through** - Update the source first, then the cache
//! - **Refresh-ahead** - Re-fetch in the background before entries expire
//! - **Invalidation** - By key, by tag group, by glob pattern, or by named
//!   rule
//!
//! # Examples
//!
//! ## Cache-aside with Redis
//!
//! ```no_run
//! use cachecast_cache::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let config = CacheConfig::redis("redis://localhost:6379")?;
//!     let store = Arc::new(RedisStore::new(config.clone()).await?);
//!     let cache = CacheCoordinator::new(store, config);
//!
//!     let ttl = cache.ttl_for("bestsellers");
//!     let ids: Vec<u64> = cache
//!         .get_or_populate("bestsellers", ttl, || async { Ok::<_, String>(vec![1, 2, 3]) })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Tag-based Invalidation
//!
//! ```
//! use cachecast_cache::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = CacheCoordinator::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
//! let ttl = Duration::from_secs(600);
//!
//! cache.set_with_tags("product:1", &"Lamp", ttl, &["electronics"]).await?;
//! cache.set_with_tags("product:2", &"Radio", ttl, &["electronics"]).await?;
//!
//! assert_eq!(cache.invalidate_by_tag("electronics").await?, 2);
//! assert_eq!(cache.peek::<String>("product:1").await?, None);
//! # Ok(())
//! # }
//! ```
//!
//! ## Refresh-ahead
//!
//! ```
//! use cachecast_cache::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = CacheCoordinator::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
//!
//! // Re-fetched every 50 minutes, so readers never see it expire.
//! let sales: Vec<String> = cache
//!     .set_refresh_ahead(
//!         "flash_sales",
//!         Duration::from_secs(3600),
//!         Duration::from_secs(600),
//!         || async { Ok::<_, String>(vec!["lamp".to_string()]) },
//!     )
//!     .await?;
//!
//! cache.shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod collapser;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod invalidation;
pub mod memory;
pub mod refresh;
pub mod traits;
pub mod ttl;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use codec::{Codec, JsonCodec};
pub use collapser::RequestCollapser;
pub use config::CacheConfig;
pub use coordinator::{CacheCoordinator, KeyStatus};
pub use error::{CacheError, CacheResult};
pub use invalidation::{InvalidationRule, InvalidationRules, TagIndex};
pub use memory::{InMemoryStore, StoreMessage};
pub use refresh::{RefreshJob, RefreshScheduler, ScheduleState, ScheduleStatus};
pub use traits::KeyValueStore;
pub use ttl::TtlPolicy;

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::codec::{Codec, JsonCodec};
    pub use crate::config::CacheConfig;
    pub use crate::coordinator::{CacheCoordinator, KeyStatus};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::invalidation::{InvalidationRule, InvalidationRules};
    pub use crate::memory::InMemoryStore;
    pub use crate::traits::KeyValueStore;
    pub use crate::ttl::TtlPolicy;

    #[cfg(feature = "redis")]
    pub use crate::redis_store::RedisStore;
}
