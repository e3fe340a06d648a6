//! Cache strategy coordinator.

use crate::codec::{Codec, JsonCodec};
use crate::collapser::RequestCollapser;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::invalidation::{InvalidationRule, InvalidationRules, TagIndex};
use crate::refresh::{RefreshJob, RefreshScheduler, ScheduleStatus};
use crate::traits::KeyValueStore;
use bytes::Bytes;
use cachecast_broadcast::{Event, EventPublisher};
use futures::FutureExt;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Presence and remaining lifetime of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatus {
    /// Logical key
    pub key: String,
    /// Whether a live entry exists
    pub exists: bool,
    /// Remaining TTL, `None` when absent or persistent
    pub ttl: Option<Duration>,
}

/// Delivers cache change events to the hub and, when configured, to the
/// store's pub/sub channel.
struct Notifier<S: KeyValueStore + 'static> {
    publisher: Option<Arc<dyn EventPublisher>>,
    store: Arc<S>,
    channel: Option<String>,
}

impl<S: KeyValueStore + 'static> Clone for Notifier<S> {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
            store: self.store.clone(),
            channel: self.channel.clone(),
        }
    }
}

impl<S: KeyValueStore + 'static> Notifier<S> {
    /// Best effort: failures are logged, never returned.
    async fn emit(&self, event: Event) {
        if let Some(publisher) = &self.publisher {
            match publisher.publish(&event) {
                Ok(delivered) => {
                    debug!(event_type = %event.event_type, delivered, "Emitted cache event")
                }
                Err(e) => {
                    warn!(event_type = %event.event_type, error = %e, "Failed to emit cache event")
                }
            }
        }

        if let Some(channel) = &self.channel {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Failed to encode cache event for store channel");
                    return;
                }
            };
            if let Err(e) = self.store.publish(channel, &payload).await {
                warn!(channel = %channel, error = %e, "Failed to publish cache event to store");
            }
        }
    }
}

async fn fetch_and_store<S, C, T, Fut, E>(
    store: Arc<S>,
    codec: Arc<C>,
    key: String,
    ttl: Duration,
    fetch: Fut,
) -> CacheResult<Bytes>
where
    S: KeyValueStore + ?Sized,
    C: Codec,
    T: Serialize,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let value = match fetch.await {
        Ok(value) => value,
        Err(e) => {
            return Err(CacheError::SourceFetchFailed {
                key,
                message: e.to_string(),
            });
        }
    };

    let bytes = codec.encode(&value)?;
    store.set_with_ttl(&key, bytes.clone(), ttl).await?;
    Ok(bytes)
}

/// Re-reads `key` before fetching: a caller that saw a miss may arrive just
/// after an earlier fetch stored the value and left the collapser.
async fn populate<S, C, T, F, Fut, E>(
    store: Arc<S>,
    codec: Arc<C>,
    key: String,
    ttl: Duration,
    fetch: F,
) -> CacheResult<Bytes>
where
    S: KeyValueStore + ?Sized,
    C: Codec,
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match store.get(&key).await {
        Ok(bytes) => {
            debug!(key = %key, "Filled by an earlier fetch");
            return Ok(bytes);
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    fetch_and_store(store, codec, key, ttl, fetch()).await
}

/// Coordinates cache-aside, write-through and refresh-ahead population over a
/// [`KeyValueStore`], and invalidation by key, tag and pattern.
///
/// Every invalidation, refresh and committed write is announced through the
/// attached [`EventPublisher`] and, if `event_channel` is configured, through
/// the store's pub/sub. Announcements are best effort.
///
/// # Examples
///
/// ```
/// use cachecast_cache::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), CacheError> {
/// let cache = CacheCoordinator::new(Arc::new(InMemoryStore::new()), CacheConfig::default());
///
/// let top: Vec<u32> = cache
///     .get_or_populate("bestsellers", Duration::from_secs(3600), || async {
///         Ok::<_, std::io::Error>(vec![7, 3, 9])
///     })
///     .await?;
/// assert_eq!(top, vec![7, 3, 9]);
/// # Ok(())
/// # }
/// ```
pub struct CacheCoordinator<S: KeyValueStore + 'static, C: Codec = JsonCodec> {
    store: Arc<S>,
    codec: Arc<C>,
    tags: TagIndex<S>,
    collapser: RequestCollapser,
    scheduler: Arc<RefreshScheduler>,
    notifier: Notifier<S>,
    config: CacheConfig,
    rules: InvalidationRules,
}

impl<S: KeyValueStore + 'static> CacheCoordinator<S, JsonCodec> {
    /// Create a coordinator storing values as JSON.
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self::with_codec(store, JsonCodec, config)
    }
}

impl<S: KeyValueStore + 'static, C: Codec> CacheCoordinator<S, C> {
    /// Create a coordinator with a custom codec.
    pub fn with_codec(store: Arc<S>, codec: C, config: CacheConfig) -> Self {
        Self {
            tags: TagIndex::new(store.clone()),
            notifier: Notifier {
                publisher: None,
                store: store.clone(),
                channel: config.event_channel.clone(),
            },
            store,
            codec: Arc::new(codec),
            collapser: RequestCollapser::new(),
            scheduler: Arc::new(RefreshScheduler::new()),
            config,
            rules: InvalidationRules::standard(),
        }
    }

    /// Announce changes through `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.notifier.publisher = Some(publisher);
        self
    }

    /// Replace the named invalidation rules.
    pub fn with_rules(mut self, rules: InvalidationRules) -> Self {
        self.rules = rules;
        self
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the named invalidation rules.
    pub fn rules(&self) -> &InvalidationRules {
        &self.rules
    }

    /// TTL configured for a data type, or the configured default TTL.
    pub fn ttl_for(&self, kind: &str) -> Duration {
        self.config
            .ttl_policy
            .get(kind)
            .unwrap_or(self.config.default_ttl)
    }

    /// Read and decode a value without populating on a miss.
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.store.get(key).await {
            Ok(bytes) => {
                debug!(key = %key, "Cache hit");
                self.codec.decode(&bytes).map(Some)
            }
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Encode and store a value directly.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let bytes = self.codec.encode(value)?;
        self.store.set_with_ttl(key, bytes, ttl).await
    }

    /// Store a value and add it to every tag in `tags`.
    pub async fn set_with_tags<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        tags: &[&str],
    ) -> CacheResult<()> {
        self.set(key, value, ttl).await?;
        self.tags.tag(key, tags, Some(ttl)).await
    }

    /// Cache-aside read.
    ///
    /// Returns the cached value on a hit. On a miss, concurrent callers for
    /// the same key share a single call to `fetch`; its result is stored with
    /// `ttl` and returned to all of them. A failed fetch writes nothing, so
    /// the next call retries.
    ///
    /// # Errors
    ///
    /// - `SourceFetchFailed` if `fetch` fails
    /// - `StoreUnavailable` if the store cannot be reached
    /// - `Deserialization` if the cached bytes do not decode as `T`
    pub async fn get_or_populate<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if let Some(value) = self.peek(key).await? {
            return Ok(value);
        }

        let store = self.store.clone();
        let codec = self.codec.clone();
        let owned_key = key.to_string();
        let bytes = self
            .collapser
            .run(key, move || populate(store, codec, owned_key, ttl, fetch))
            .await?;

        self.codec.decode(&bytes)
    }

    /// Write-through update.
    ///
    /// Runs `write` against the source of truth first; only if it succeeds is
    /// the cache entry replaced. A `write_committed` event follows.
    ///
    /// # Errors
    ///
    /// - `SourceWriteFailed` if `write` fails; the cache is left untouched
    /// - `StoreUnavailable` if the store cannot be reached
    pub async fn write_through<T, W, Fut, E>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        write: W,
    ) -> CacheResult<()>
    where
        T: Serialize,
        W: FnOnce(&T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        if let Err(e) = write(value).await {
            return Err(CacheError::SourceWriteFailed {
                key: key.to_string(),
                message: e.to_string(),
            });
        }

        self.set(key, value, ttl).await?;
        debug!(key = %key, "Wrote through to cache");
        self.notifier.emit(Event::write_committed(key)).await;
        Ok(())
    }

    /// Refresh-ahead population.
    ///
    /// Fetches and stores a fresh value now, then re-runs `refresh` every
    /// `ttl - lead_time` in the background so readers keep hitting. Any
    /// schedule already running for `key` is replaced. When `lead_time` is
    /// not shorter than `ttl` the value is stored once and nothing is
    /// scheduled.
    ///
    /// # Errors
    ///
    /// - `Closed` after [`shutdown`](Self::shutdown)
    /// - `SourceFetchFailed` if the initial fetch fails
    pub async fn set_refresh_ahead<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        lead_time: Duration,
        refresh: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if self.scheduler.is_shut_down() {
            return Err(CacheError::Closed);
        }
        self.scheduler.stop(key);

        let refresh = Arc::new(refresh);
        let bytes = {
            let store = self.store.clone();
            let codec = self.codec.clone();
            let owned_key = key.to_string();
            let refresh = refresh.clone();
            self.collapser
                .run(key, move || {
                    fetch_and_store(store, codec, owned_key, ttl, (*refresh)())
                })
                .await?
        };
        let value = self.codec.decode(&bytes)?;

        match ttl.checked_sub(lead_time).filter(|interval| !interval.is_zero()) {
            Some(interval) => {
                let job = self.refresh_job(key, ttl, refresh);
                self.scheduler.install(key, interval, job)?;
            }
            None => {
                debug!(key = %key, ttl = ?ttl, lead_time = ?lead_time, "Lead time covers TTL, not scheduling refresh");
            }
        }

        Ok(value)
    }

    /// Refresh-ahead using the TTL for `kind` and the configured lead time.
    pub async fn set_refresh_ahead_for<T, F, Fut, E>(
        &self,
        kind: &str,
        key: &str,
        refresh: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let ttl = self.ttl_for(kind);
        self.set_refresh_ahead(key, ttl, self.config.refresh_lead_time, refresh)
            .await
    }

    fn refresh_job<T, F, Fut, E>(&self, key: &str, ttl: Duration, refresh: Arc<F>) -> RefreshJob
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let store = self.store.clone();
        let codec = self.codec.clone();
        let notifier = self.notifier.clone();
        let key = key.to_string();

        Arc::new(move || {
            let store = store.clone();
            let codec = codec.clone();
            let notifier = notifier.clone();
            let key = key.clone();
            let fetch = (*refresh)();
            async move {
                fetch_and_store(store, codec, key.clone(), ttl, fetch).await?;
                notifier.emit(Event::entry_refreshed(&key)).await;
                Ok(())
            }
            .boxed()
        })
    }

    /// Stop the refresh schedule for `key`. Returns `false` if there was none.
    pub fn stop_refresh(&self, key: &str) -> bool {
        self.scheduler.stop(key)
    }

    /// Status of the refresh schedule for `key`.
    pub fn refresh_status(&self, key: &str) -> Option<ScheduleStatus> {
        self.scheduler.status(key)
    }

    /// Keys with a live refresh schedule.
    pub fn refreshing_keys(&self) -> Vec<String> {
        self.scheduler.keys()
    }

    /// Whether a population fetch for `key` is running.
    pub fn is_populating(&self, key: &str) -> bool {
        self.collapser.is_in_flight(key)
    }

    /// Delete one key and announce it.
    pub async fn invalidate(&self, key: &str) -> CacheResult<()> {
        self.store.delete(key).await?;
        info!(key = %key, "Invalidated cache key");
        self.notifier.emit(Event::key_invalidated(key)).await;
        Ok(())
    }

    /// Delete every key in a tag group along with the tag itself.
    ///
    /// # Returns
    ///
    /// The number of keys the tag listed. An unknown or already invalidated
    /// tag returns 0 and announces nothing.
    pub async fn invalidate_by_tag(&self, tag: &str) -> CacheResult<usize> {
        let keys = self.tags.invalidate(tag).await?;
        if keys.is_empty() {
            debug!(tag = %tag, "Tag has no members");
            return Ok(0);
        }

        info!(tag = %tag, removed = keys.len(), "Invalidated cache tag");
        self.notifier
            .emit(Event::tag_invalidated(tag, keys.len()))
            .await;
        Ok(keys.len())
    }

    /// Delete every key matching a glob pattern.
    ///
    /// # Returns
    ///
    /// The number of keys removed. Nothing is announced when no key matched.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let removed = self.store.delete_by_pattern(pattern).await?;
        if removed == 0 {
            debug!(pattern = %pattern, "Pattern matched no keys");
            return Ok(0);
        }

        info!(pattern = %pattern, removed, "Invalidated cache pattern");
        self.notifier
            .emit(Event::pattern_invalidated(pattern, removed))
            .await;
        Ok(removed)
    }

    /// Clear the whole store namespace.
    pub async fn invalidate_all(&self) -> CacheResult<()> {
        self.store.clear().await?;
        info!("Invalidated entire cache");
        self.notifier.emit(Event::all_invalidated()).await;
        Ok(())
    }

    /// Run the invalidation registered under a cache type name.
    ///
    /// Unknown names delete the key of the same name.
    ///
    /// # Returns
    ///
    /// The rule that was applied.
    pub async fn invalidate_named(&self, name: &str) -> CacheResult<InvalidationRule> {
        let rule = self.rules.resolve(name);
        match &rule {
            InvalidationRule::Key(key) => self.invalidate(key).await?,
            InvalidationRule::Pattern(pattern) => {
                self.invalidate_by_pattern(pattern).await?;
            }
            InvalidationRule::Tag(tag) => {
                self.invalidate_by_tag(tag).await?;
            }
        }
        Ok(rule)
    }

    /// Add an existing key to tag groups.
    ///
    /// Each tag's TTL is extended to at least the key's remaining TTL so the
    /// membership never expires before the entry.
    ///
    /// # Errors
    ///
    /// `NotFound` if `key` holds no live entry.
    pub async fn tag_key(&self, key: &str, tags: &[&str]) -> CacheResult<()> {
        if !self.store.exists(key).await? {
            return Err(CacheError::NotFound(key.to_string()));
        }
        let ttl = self.store.ttl(key).await?;
        self.tags.tag(key, tags, ttl).await
    }

    /// Keys currently listed under a tag.
    pub async fn tagged_keys(&self, tag: &str) -> CacheResult<Vec<String>> {
        self.tags.keys(tag).await
    }

    /// Presence and remaining TTL for each key.
    pub async fn status(&self, keys: &[&str]) -> CacheResult<Vec<KeyStatus>> {
        let mut statuses = Vec::with_capacity(keys.len());
        for key in keys {
            let exists = self.store.exists(key).await?;
            let ttl = if exists {
                self.store.ttl(key).await?
            } else {
                None
            };
            statuses.push(KeyStatus {
                key: key.to_string(),
                exists,
                ttl,
            });
        }
        Ok(statuses)
    }

    /// Number of live keys matching a glob pattern.
    pub async fn pattern_count(&self, pattern: &str) -> CacheResult<usize> {
        Ok(self.store.keys(pattern).await?.len())
    }

    /// Stop every refresh schedule. Further refresh-ahead calls fail with
    /// `Closed`; reads, writes and invalidation keep working.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.scheduler.is_shut_down()
    }
}

impl<S: KeyValueStore + 'static, C: Codec> Clone for CacheCoordinator<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            codec: self.codec.clone(),
            tags: self.tags.clone(),
            collapser: self.collapser.clone(),
            scheduler: self.scheduler.clone(),
            notifier: self.notifier.clone(),
            config: self.config.clone(),
            rules: self.rules.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use cachecast_broadcast::BroadcastResult;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<Event>>,
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, event: &Event) -> BroadcastResult<usize> {
            self.events.lock().push(event.clone());
            Ok(1)
        }
    }

    fn coordinator() -> (
        CacheCoordinator<InMemoryStore>,
        Arc<RecordingPublisher>,
    ) {
        let publisher = Arc::new(RecordingPublisher::default());
        let cache = CacheCoordinator::new(Arc::new(InMemoryStore::new()), CacheConfig::default())
            .with_publisher(publisher.clone());
        (cache, publisher)
    }

    #[tokio::test]
    async fn test_peek_missing() {
        let (cache, _) = coordinator();
        assert_eq!(cache.peek::<String>("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_emits_event() {
        let (cache, publisher) = coordinator();
        cache
            .set("bestsellers", &vec![1, 2], Duration::from_secs(60))
            .await
            .unwrap();

        cache.invalidate("bestsellers").await.unwrap();

        let events = publisher.events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].is("cache_invalidated"));
        assert_eq!(events[0].data["key"], "bestsellers");
    }

    #[tokio::test]
    async fn test_empty_pattern_is_silent() {
        let (cache, publisher) = coordinator();
        assert_eq!(cache.invalidate_by_pattern("nope:*").await.unwrap(), 0);
        assert!(publisher.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_named_rules() {
        let (cache, _) = coordinator();
        let ttl = Duration::from_secs(60);
        cache.set("recommendations:1", &1, ttl).await.unwrap();
        cache.set("recommendations:2", &2, ttl).await.unwrap();
        cache.set("flash_sales", &3, ttl).await.unwrap();
        cache.set("cart:7", &4, ttl).await.unwrap();

        let rule = cache.invalidate_named("recommendations").await.unwrap();
        assert_eq!(rule, InvalidationRule::Pattern("recommendations:*".into()));
        assert_eq!(cache.pattern_count("recommendations:*").await.unwrap(), 0);

        cache.invalidate_named("flash-sales").await.unwrap();
        assert_eq!(cache.peek::<i32>("flash_sales").await.unwrap(), None);

        // Unknown names fall back to the key itself.
        cache.invalidate_named("cart:7").await.unwrap();
        assert_eq!(cache.peek::<i32>("cart:7").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tag_missing_key() {
        let (cache, _) = coordinator();
        let err = cache.tag_key("ghost", &["products"]).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_status_and_ttl_policy() {
        let (cache, _) = coordinator();
        cache
            .set("bestsellers", &"x", cache.ttl_for("bestsellers"))
            .await
            .unwrap();

        let status = cache.status(&["bestsellers", "cart"]).await.unwrap();
        assert!(status[0].exists);
        assert!(status[0].ttl.is_some());
        assert!(!status[1].exists);
        assert_eq!(status[1].ttl, None);

        assert_eq!(cache.ttl_for("bestsellers"), Duration::from_secs(3600));
        assert_eq!(cache.ttl_for("unknown"), Duration::from_secs(300));

        let cache = CacheCoordinator::new(
            Arc::new(InMemoryStore::new()),
            CacheConfig::default().with_default_ttl(Duration::from_secs(42)),
        );
        assert_eq!(cache.ttl_for("unknown"), Duration::from_secs(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_ahead_for_kind() {
        let (cache, _) = coordinator();

        // Two hours minus the ten minute default lead.
        cache
            .set_refresh_ahead_for("top_comments", "top_comments:product:1", || async {
                Ok::<_, String>(vec!["nice".to_string()])
            })
            .await
            .unwrap();
        let status = cache.refresh_status("top_comments:product:1").unwrap();
        assert_eq!(status.interval(), Duration::from_secs(110 * 60));

        // Five minutes is shorter than the lead, so nothing is scheduled.
        cache
            .set_refresh_ahead_for("flash_sales", "flash_sales", || async {
                Ok::<_, String>(1)
            })
            .await
            .unwrap();
        assert!(cache.refresh_status("flash_sales").is_none());
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_event_channel_mirror() {
        let store = Arc::new(InMemoryStore::new());
        let mut messages = store.subscribe();
        let cache = CacheCoordinator::new(
            store,
            CacheConfig::default().with_event_channel("cache_events"),
        );

        cache.invalidate("bestsellers").await.unwrap();

        let message = messages.recv().await.unwrap();
        assert_eq!(message.channel, "cache_events");
        let event = Event::from_slice(message.payload.as_bytes()).unwrap();
        assert_eq!(event.data["key"], "bestsellers");
    }
}
