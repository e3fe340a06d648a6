//! Subscriber handles.

use crate::event::Event;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Unique identifier for a registered subscriber.
pub type SubscriberId = String;

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload was queued for delivery
    Accepted,
    /// The queue was full or the subscriber is closed
    Rejected,
}

impl SendOutcome {
    /// Whether the payload was queued.
    pub fn is_accepted(&self) -> bool {
        *self == SendOutcome::Accepted
    }
}

/// A transport-owned connection the hub can deliver to.
///
/// `try_send` must never wait: the hub calls it while fanning out to every
/// subscriber and treats `Rejected` as a dead or hopelessly slow consumer.
/// `close` must be idempotent.
pub trait Subscriber: Send + Sync {
    /// Queue a serialized event envelope without blocking.
    fn try_send(&self, payload: Bytes) -> SendOutcome;

    /// Release the connection. Later `try_send` calls are rejected.
    fn close(&self);
}

/// Subscriber backed by a bounded tokio channel.
///
/// The transport side holds the paired [`SubscriberStream`] and drains it on
/// its own task, writing each payload to the wire.
pub struct ChannelSubscriber {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl ChannelSubscriber {
    /// Create a subscriber whose outbound queue holds `capacity` payloads.
    pub fn channel(capacity: usize) -> (Self, SubscriberStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            SubscriberStream { rx },
        )
    }

    /// Check whether the subscriber has been closed.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().is_none_or(|tx| tx.is_closed())
    }
}

impl Subscriber for ChannelSubscriber {
    fn try_send(&self, payload: Bytes) -> SendOutcome {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return SendOutcome::Rejected;
        };

        match tx.try_send(payload) {
            Ok(()) => SendOutcome::Accepted,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => SendOutcome::Rejected,
        }
    }

    fn close(&self) {
        // Dropping the sender lets the stream drain what is queued, then end.
        self.tx.lock().take();
    }
}

/// Receiving half of a [`ChannelSubscriber`].
pub struct SubscriberStream {
    rx: mpsc::Receiver<Bytes>,
}

impl SubscriberStream {
    /// Receive the next payload, or `None` once the subscriber is closed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Receive the next payload without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Receive and decode the next event envelope.
    pub async fn recv_event(&mut self) -> Option<Result<Event, serde_json::Error>> {
        self.recv().await.map(|payload| Event::from_slice(&payload))
    }

    /// Decode the next queued event without waiting.
    pub fn try_recv_event(&mut self) -> Option<Result<Event, serde_json::Error>> {
        self.try_recv().map(|payload| Event::from_slice(&payload))
    }
}
