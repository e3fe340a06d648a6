//! End-to-end tests for cachecast.
//!
//! A storefront cache wired to a broadcast hub, with listeners draining their
//! queues on their own tasks the way a websocket writer would.

use cachecast::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

fn storefront() -> (CacheCoordinator<InMemoryStore>, Arc<BroadcastHub>) {
    let hub = Arc::new(BroadcastHub::new());
    let cache = CacheCoordinator::new(Arc::new(InMemoryStore::new()), CacheConfig::default())
        .with_publisher(hub.clone());
    (cache, hub)
}

/// Drain a subscriber on its own task, forwarding decoded events.
fn spawn_listener(mut stream: SubscriberStream) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = stream.recv_event().await {
            if tx.send(event.unwrap()).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::test]
async fn test_bestsellers_invalidation_reaches_every_listener() {
    let (cache, hub) = storefront();
    let ttl = cache.ttl_for("bestsellers");

    let ids: Vec<u64> = assert_ok!(
        cache
            .get_or_populate("bestsellers", ttl, || async {
                Ok::<_, String>(vec![101, 205, 309])
            })
            .await
    );
    assert_eq!(ids, vec![101, 205, 309]);

    let mut listeners: Vec<_> = (0..3).map(|_| spawn_listener(hub.subscribe().1)).collect();

    assert_ok!(cache.invalidate("bestsellers").await);

    let (_late_id, mut late) = hub.subscribe();

    for listener in &mut listeners {
        let event = tokio::time::timeout(Duration::from_secs(1), listener.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, "cache_invalidated");
        assert_eq!(event.data["key"], "bestsellers");
    }

    // Registered after the fact: no replay.
    assert!(late.try_recv().is_none());
    assert_eq!(cache.peek::<Vec<u64>>("bestsellers").await.unwrap(), None);
}

#[tokio::test]
async fn test_event_envelope_on_the_wire() {
    let (cache, hub) = storefront();
    let (_id, mut stream) = hub.subscribe();

    cache
        .set("flash_sales", &vec!["lamp"], cache.ttl_for("flash_sales"))
        .await
        .unwrap();
    cache.invalidate_named("flash-sales").await.unwrap();

    let payload = stream.recv().await.unwrap();
    let wire: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(wire["type"], "cache_invalidated");
    assert_eq!(wire["data"]["key"], "flash_sales");
    assert!(wire["timestamp"].is_string());
}

#[tokio::test]
async fn test_store_channel_mirrors_hub() {
    let store = Arc::new(InMemoryStore::new());
    let mut channel = store.subscribe();
    let hub = Arc::new(BroadcastHub::new());
    let (_id, mut stream) = hub.subscribe();

    let config = CacheConfig::default().with_event_channel("cache_invalidated");
    let cache = CacheCoordinator::new(store, config).with_publisher(hub.clone());

    cache
        .set_with_tags("product:9", &"Desk", Duration::from_secs(60), &["furniture"])
        .await
        .unwrap();
    assert_eq!(cache.invalidate_by_tag("furniture").await.unwrap(), 1);

    let from_hub = stream.recv_event().await.unwrap().unwrap();
    let message = channel.recv().await.unwrap();
    let from_store = Event::from_slice(message.payload.as_bytes()).unwrap();

    assert_eq!(message.channel, "cache_invalidated");
    assert_eq!(from_hub, from_store);
    assert_eq!(from_store.data["tag"], "furniture");
}

#[tokio::test(start_paused = true)]
async fn test_refresh_ahead_announces_refreshes_until_shutdown() {
    let (cache, hub) = storefront();
    let mut listener = spawn_listener(hub.subscribe().1);

    let top: Vec<String> = cache
        .set_refresh_ahead(
            "top_comments",
            Duration::from_secs(60),
            Duration::from_secs(20),
            || async { Ok::<_, String>(vec!["great lamp".to_string()]) },
        )
        .await
        .unwrap();
    assert_eq!(top.len(), 1);

    for _ in 0..3 {
        let event = listener.recv().await.unwrap();
        assert!(event.is(event_types::ENTRY_REFRESHED));
        assert_eq!(event.data["key"], "top_comments");
    }

    cache.shutdown();
    assert!(cache.refreshing_keys().is_empty());

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert!(listener.try_recv().is_err());
}
