//! Background refresh-ahead schedules.

use crate::error::{CacheError, CacheResult};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Work run on every firing of a schedule.
pub type RefreshJob = Arc<dyn Fn() -> BoxFuture<'static, CacheResult<()>> + Send + Sync>;

/// Lifecycle of one schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScheduleState {
    /// Installed, task not yet started
    Idle = 0,
    /// Waiting for the next tick
    Scheduled = 1,
    /// Executing the refresh job
    Running = 2,
    /// Cancelled; will never fire again
    Stopped = 3,
}

impl ScheduleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ScheduleState::Idle,
            1 => ScheduleState::Scheduled,
            2 => ScheduleState::Running,
            _ => ScheduleState::Stopped,
        }
    }
}

/// Shared view of a schedule, still readable after it is stopped.
#[derive(Debug, Clone)]
pub struct ScheduleStatus {
    state: Arc<AtomicU8>,
    refreshes: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    interval: Duration,
}

impl ScheduleStatus {
    fn new(interval: Duration) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ScheduleState::Idle as u8)),
            refreshes: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            interval,
        }
    }

    fn set(&self, state: ScheduleState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn advance(&self, state: ScheduleState) {
        // Never leave Stopped once reached.
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != ScheduleState::Stopped as u8).then_some(state as u8)
            });
    }

    /// Current state.
    pub fn state(&self) -> ScheduleState {
        ScheduleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Successful refreshes so far.
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Failed refreshes so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Time between firings.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

struct Schedule {
    status: ScheduleStatus,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Schedule {
    fn stop(self) {
        self.status.set(ScheduleState::Stopped);
        let _ = self.stop.send(true);
        self.task.abort();
    }
}

/// Registry of per-key periodic refresh tasks.
///
/// At most one schedule exists per key: installing over an existing key
/// stops the old schedule before the new one is registered. Every schedule
/// is stopped on [`shutdown`](Self::shutdown) or when the scheduler drops.
pub struct RefreshScheduler {
    schedules: Mutex<HashMap<String, Schedule>>,
    closed: AtomicBool,
}

impl RefreshScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            schedules: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Install or replace the schedule for `key`.
    ///
    /// The first firing happens one `interval` from now. Must be called from
    /// within a tokio runtime.
    pub fn install(
        &self,
        key: &str,
        interval: Duration,
        job: RefreshJob,
    ) -> CacheResult<ScheduleStatus> {
        if interval.is_zero() {
            return Err(CacheError::Config(format!(
                "refresh interval for '{key}' must be positive"
            )));
        }

        let mut schedules = self.schedules.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }

        if let Some(previous) = schedules.remove(key) {
            previous.stop();
            debug!(key = %key, "Stopped previous refresh schedule");
        }

        let status = ScheduleStatus::new(interval);
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_schedule(
            key.to_string(),
            interval,
            job,
            status.clone(),
            stop_rx,
        ));

        schedules.insert(
            key.to_string(),
            Schedule {
                status: status.clone(),
                stop,
                task,
            },
        );

        info!(key = %key, interval = ?interval, "Installed refresh schedule");
        Ok(status)
    }

    /// Stop the schedule for `key`. Returns `false` if there was none.
    pub fn stop(&self, key: &str) -> bool {
        let removed = self.schedules.lock().remove(key);
        match removed {
            Some(schedule) => {
                schedule.stop();
                info!(key = %key, "Stopped refresh schedule");
                true
            }
            None => false,
        }
    }

    /// Stop every schedule and refuse new ones. Safe to call repeatedly and
    /// from any thread.
    pub fn shutdown(&self) {
        let drained: Vec<(String, Schedule)> = {
            let mut schedules = self.schedules.lock();
            self.closed.store(true, Ordering::SeqCst);
            schedules.drain().collect()
        };

        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        for (_, schedule) in drained {
            schedule.stop();
        }
        info!(count, "Refresh scheduler shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Status of the live schedule for `key`.
    pub fn status(&self, key: &str) -> Option<ScheduleStatus> {
        self.schedules.lock().get(key).map(|s| s.status.clone())
    }

    /// Keys with a live schedule.
    pub fn keys(&self) -> Vec<String> {
        self.schedules.lock().keys().cloned().collect()
    }

    /// Number of live schedules.
    pub fn len(&self) -> usize {
        self.schedules.lock().len()
    }

    /// Whether no schedule is live.
    pub fn is_empty(&self) -> bool {
        self.schedules.lock().is_empty()
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_schedule(
    key: String,
    interval: Duration,
    job: RefreshJob,
    status: ScheduleStatus,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    status.advance(ScheduleState::Scheduled);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }

        status.advance(ScheduleState::Running);
        let outcome = tokio::select! {
            biased;
            _ = stop.changed() => break,
            outcome = job() => outcome,
        };

        match outcome {
            Ok(()) => {
                status.refreshes.fetch_add(1, Ordering::SeqCst);
                debug!(key = %key, "Proactively refreshed cache entry");
            }
            Err(e) => {
                status.failures.fetch_add(1, Ordering::SeqCst);
                warn!(key = %key, error = %e, "Refresh failed, retrying next interval");
            }
        }
        status.advance(ScheduleState::Scheduled);
    }

    status.set(ScheduleState::Stopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_job(counter: Arc<AtomicUsize>) -> RefreshJob {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_every_interval() {
        let scheduler = RefreshScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let status = scheduler
            .install("k", Duration::from_secs(10), counting_job(counter.clone()))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(22)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(status.refreshes(), 3);
        assert_eq!(status.state(), ScheduleState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_schedule() {
        let scheduler = RefreshScheduler::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let job: RefreshJob = {
            let attempts = attempts.clone();
            Arc::new(move || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(CacheError::StoreUnavailable("down".into()))
                }
                .boxed()
            })
        };

        let status = scheduler
            .install("k", Duration::from_secs(1), job)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(status.failures(), 3);
        assert_eq!(status.refreshes(), 0);
        assert!(scheduler.status("k").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_stops_previous() {
        let scheduler = RefreshScheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let old = scheduler
            .install("k", Duration::from_secs(5), counting_job(first.clone()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);

        scheduler
            .install("k", Duration::from_secs(5), counting_job(second.clone()))
            .unwrap();
        assert_eq!(old.state(), ScheduleState::Stopped);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_single_key() {
        let scheduler = RefreshScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .install("k", Duration::from_secs(1), counting_job(counter.clone()))
            .unwrap();

        assert!(scheduler.stop("k"));
        assert!(!scheduler.stop("k"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent_and_final() {
        let scheduler = Arc::new(RefreshScheduler::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let a = scheduler
            .install("a", Duration::from_secs(1), counting_job(counter.clone()))
            .unwrap();
        let b = scheduler
            .install("b", Duration::from_secs(1), counting_job(counter.clone()))
            .unwrap();

        let remote = scheduler.clone();
        std::thread::spawn(move || remote.shutdown()).join().unwrap();
        scheduler.shutdown();

        assert_eq!(a.state(), ScheduleState::Stopped);
        assert_eq!(b.state(), ScheduleState::Stopped);
        assert!(scheduler.is_shut_down());

        let err = scheduler
            .install("c", Duration::from_secs(1), counting_job(counter.clone()))
            .unwrap_err();
        assert!(matches!(err, CacheError::Closed));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let scheduler = RefreshScheduler::new();
        let err = scheduler
            .install(
                "k",
                Duration::ZERO,
                counting_job(Arc::new(AtomicUsize::new(0))),
            )
            .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
