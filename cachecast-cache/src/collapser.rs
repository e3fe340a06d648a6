//! Single-flight collapsing of concurrent fetches.

use crate::error::{CacheError, CacheResult};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

type SharedFetch = Shared<BoxFuture<'static, CacheResult<Bytes>>>;

struct InFlightFetch {
    id: u64,
    result: SharedFetch,
    waiters: Arc<AtomicUsize>,
}

/// Counts a caller as attached until it finishes waiting or is dropped.
struct Attached(Arc<AtomicUsize>);

impl Attached {
    fn new(waiters: Arc<AtomicUsize>) -> Self {
        waiters.fetch_add(1, Ordering::SeqCst);
        Self(waiters)
    }
}

impl Drop for Attached {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Deduplicates concurrent fetches for the same key.
///
/// The first caller for a key starts the fetch on its own task; everyone who
/// arrives while it runs awaits the same result. Dropping a waiter never
/// cancels the fetch. The record is removed as soon as the fetch resolves,
/// so the next miss starts over instead of replaying an old result.
#[derive(Clone, Default)]
pub struct RequestCollapser {
    in_flight: Arc<Mutex<HashMap<String, InFlightFetch>>>,
    next_id: Arc<AtomicU64>,
}

impl RequestCollapser {
    /// Create an empty collapser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key` unless a fetch for it is already running, in
    /// which case wait for that one instead.
    ///
    /// `fetch` is called on the spawned task, never while the registry is
    /// locked, so it may call back into the collapser.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> CacheResult<Bytes>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Bytes>> + Send + 'static,
    {
        let (result, waiters) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(existing) => {
                    tracing::debug!(key = %key, "Joined in-flight fetch");
                    (existing.result.clone(), existing.waiters.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let result = self.start(key.to_string(), id, fetch);
                    let waiters = Arc::new(AtomicUsize::new(0));
                    in_flight.insert(
                        key.to_string(),
                        InFlightFetch {
                            id,
                            result: result.clone(),
                            waiters: waiters.clone(),
                        },
                    );
                    (result, waiters)
                }
            }
        };

        let _attached = Attached::new(waiters);
        result.await
    }

    fn start<F, Fut>(&self, key: String, id: u64, fetch: F) -> SharedFetch
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Bytes>> + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = fetch().await;
            let mut in_flight = in_flight.lock();
            if in_flight.get(&task_key).is_some_and(|f| f.id == id) {
                in_flight.remove(&task_key);
            }
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(CacheError::SourceFetchFailed {
                    key,
                    message: format!("fetch task aborted: {e}"),
                }),
            }
        }
        .boxed()
        .shared()
    }

    /// Number of callers currently waiting on the fetch running for `key`.
    pub fn waiters(&self, key: &str) -> usize {
        self.in_flight
            .lock()
            .get(key)
            .map_or(0, |f| f.waiters.load(Ordering::SeqCst))
    }

    /// Whether a fetch for `key` is running.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Number of keys with a fetch running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}
