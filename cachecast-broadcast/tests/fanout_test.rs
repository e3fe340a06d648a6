//! Integration tests for cachecast-broadcast

use bytes::Bytes;
use cachecast_broadcast::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_test::{assert_err, assert_ok};

/// Subscriber that refuses everything, like a connection whose socket died.
#[derive(Default)]
struct DeadSubscriber {
    attempts: AtomicUsize,
    closed: AtomicUsize,
}

impl Subscriber for DeadSubscriber {
    fn try_send(&self, _payload: Bytes) -> SendOutcome {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        SendOutcome::Rejected
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_fan_out_to_many_subscribers() {
    let hub = BroadcastHub::new();
    let mut streams: Vec<_> = (0..100).map(|_| hub.subscribe().1).collect();

    let delivered = assert_ok!(hub.broadcast(&Event::key_invalidated("bestsellers")));
    assert_eq!(delivered, 100);

    for stream in &mut streams {
        let event = stream.try_recv_event().unwrap().unwrap();
        assert!(event.is(event_types::CACHE_INVALIDATED));
        assert_eq!(event.data["key"], "bestsellers");
    }
}

#[tokio::test]
async fn test_slow_subscriber_is_dropped_without_blocking() {
    let hub = BroadcastHub::with_config(HubConfig::default().with_queue_capacity(2));
    let (slow_id, mut slow) = hub.subscribe();
    let (fast_id, mut fast) = hub.subscribe();

    for i in 0..3 {
        hub.broadcast(&Event::key_invalidated(&format!("product:{i}")))
            .unwrap();
        // The fast subscriber keeps up.
        assert!(fast.try_recv().is_some());
    }

    assert!(!hub.contains(&slow_id));
    assert!(hub.contains(&fast_id));

    // What was queued before the drop is still readable, then the stream ends.
    assert!(slow.recv().await.is_some());
    assert!(slow.recv().await.is_some());
    assert!(slow.recv().await.is_none());
}

#[tokio::test]
async fn test_dead_subscriber_is_closed_once() {
    let hub = BroadcastHub::new();
    let dead = Arc::new(DeadSubscriber::default());
    let id = hub.register(dead.clone());
    let (_live_id, mut live) = hub.subscribe();

    let delivered = hub.broadcast(&Event::all_invalidated()).unwrap();
    assert_eq!(delivered, 1);
    hub.broadcast(&Event::all_invalidated()).unwrap();

    assert!(!hub.contains(&id));
    assert_eq!(dead.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(dead.closed.load(Ordering::SeqCst), 1);
    assert!(live.try_recv().is_some());
    assert!(live.try_recv().is_some());
}

#[tokio::test]
async fn test_unregistered_subscriber_receives_nothing() {
    let hub = BroadcastHub::new();
    let (id, mut stream) = hub.subscribe();

    assert_ok!(hub.unregister(&id));
    assert_err!(hub.unregister(&id));

    assert_eq!(hub.broadcast(&Event::key_invalidated("cart")).unwrap(), 0);
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_register_as_rejects_duplicates() {
    let hub = BroadcastHub::new();
    let (first, _first_stream) = ChannelSubscriber::channel(4);
    let (second, _second_stream) = ChannelSubscriber::channel(4);

    assert_ok!(hub.register_as("dashboard", Arc::new(first)));
    let err = assert_err!(hub.register_as("dashboard", Arc::new(second)));
    assert!(matches!(err, BroadcastError::AlreadyRegistered(id) if id == "dashboard"));
    assert_eq!(hub.subscriber_count(), 1);
}

#[tokio::test]
async fn test_greeting_goes_only_to_new_subscriber() {
    let hub = BroadcastHub::with_config(HubConfig::default().with_greeting(true));
    let (first_id, mut first) = hub.subscribe();

    let greeting = first.try_recv_event().unwrap().unwrap();
    assert!(greeting.is(event_types::CONNECTION));
    assert_eq!(greeting.data["subscriber"], first_id.as_str());

    let (_second_id, mut second) = hub.subscribe();
    assert!(first.try_recv().is_none());
    assert!(second.try_recv_event().unwrap().unwrap().is(event_types::CONNECTION));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_membership_and_broadcast() {
    let hub = Arc::new(BroadcastHub::new());
    let received = Arc::new(AtomicUsize::new(0));

    let mut consumers = Vec::new();
    for _ in 0..8 {
        let (_id, mut stream) = hub.subscribe();
        let received = received.clone();
        consumers.push(tokio::spawn(async move {
            while let Some(event) = stream.recv_event().await {
                assert!(event.is_ok());
                received.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    let churn = {
        let hub = hub.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                let (id, _stream) = hub.subscribe();
                tokio::task::yield_now().await;
                // Fan-out may already have dropped it.
                let _ = hub.unregister(&id);
            }
        })
    };

    let publisher = {
        let hub = hub.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                hub.broadcast(&Event::key_invalidated(&format!("k{i}")))
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    churn.await.unwrap();
    publisher.await.unwrap();
    hub.close_all();

    for consumer in consumers {
        consumer.await.unwrap();
    }

    assert_eq!(hub.subscriber_count(), 0);
    // Twenty events never fill a 64-slot queue.
    assert_eq!(received.load(Ordering::SeqCst), 8 * 20);
}
