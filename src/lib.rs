//! # cachecast
//!
//! A read/write caching layer in front of a slower source of truth, coupled
//! to a real-time hub that tells connected listeners whenever cached state
//! changes.
//!
//! - [`cachecast_cache`] - strategies, stores, refresh scheduling, invalidation
//! - [`cachecast_broadcast`] - subscriber registry and non-blocking fan-out
//! - [`logging`] - `tracing` subscriber setup from the environment
//!
//! ## Features
//!
//! - `redis` - Redis-backed store (enabled by default)
//!
//! ## Example
//!
//! ```
//! use cachecast::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CacheError> {
//! cachecast::logging::init();
//!
//! let hub = Arc::new(BroadcastHub::new());
//! let (_id, mut listener) = hub.subscribe();
//!
//! let cache = CacheCoordinator::new(Arc::new(InMemoryStore::new()), CacheConfig::default())
//!     .with_publisher(hub.clone());
//!
//! let ttl = cache.ttl_for("bestsellers");
//! let ids: Vec<u64> = cache
//!     .get_or_populate("bestsellers", ttl, || async { Ok::<_, String>(vec![3, 1, 2]) })
//!     .await?;
//! assert_eq!(ids, vec![3, 1, 2]);
//!
//! cache.invalidate("bestsellers").await?;
//! let event = listener.recv_event().await.unwrap().unwrap();
//! assert_eq!(event.data["key"], "bestsellers");
//! # Ok(())
//! # }
//! ```

pub mod logging;

pub use cachecast_broadcast;
pub use cachecast_cache;

/// Re-export commonly used types
pub mod prelude {
    pub use cachecast_broadcast::{
        BroadcastError, BroadcastHub, ChannelSubscriber, Event, EventPublisher, HubConfig,
        SendOutcome, Subscriber, SubscriberStream, event_types,
    };
    pub use cachecast_cache::prelude::*;
    pub use cachecast_cache::{RefreshScheduler, RequestCollapser, ScheduleState};
}
