//! # cachecast broadcast
//!
//! Real-time fan-out of cache change events to connected listeners.
//!
//! ## Features
//!
//! - Registry of live subscribers behind a single lock
//! - Non-blocking fan-out with bounded per-subscriber queues
//! - Slow or dead subscribers are dropped instead of stalling publishers
//! - JSON event envelope with `type`, `data` and `timestamp`
//!
//! ## Example
//!
//! ```rust
//! use cachecast_broadcast::{BroadcastHub, Event};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let hub = BroadcastHub::new();
//! let (_id, mut stream) = hub.subscribe();
//!
//! hub.broadcast(&Event::key_invalidated("bestsellers")).unwrap();
//!
//! let event = stream.recv_event().await.unwrap().unwrap();
//! assert_eq!(event.data["key"], "bestsellers");
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod error;
mod event;
mod hub;
mod subscriber;

pub use error::{BroadcastError, BroadcastResult};
pub use event::{Event, event_types};
pub use hub::{BroadcastHub, EventPublisher, HubConfig};
pub use subscriber::{ChannelSubscriber, SendOutcome, Subscriber, SubscriberId, SubscriberStream};
