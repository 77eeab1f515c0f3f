//! Background poll loop: fetch, normalize, persist, occasionally evict.
//!
//! The loop lives on its own tokio task, started and stopped through
//! [`Poller`]. Every failure is confined to the tick that produced it; the next
//! tick is the retry. A stop request is only observed during the wait between
//! ticks, so an in-flight fetch finishes (or times out) before the task ends.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use utoipa::ToSchema;

use crate::sample::{parse_payload, DayBucket, ParseError, Sample};
use crate::source::{FetchError, PositionSource};
use crate::store::{SampleStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub days: u32,
    pub sweep_every: u32,
}

impl RetentionPolicy {
    /// Samples on days strictly before this are evicted.
    pub fn cutoff(&self, today: DayBucket) -> DayBucket {
        today.days_before(self.days)
    }
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub day_quota: Option<usize>,
    pub retention: Option<RetentionPolicy>,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("unexpected payload: {0}")]
    Parse(#[from] ParseError),
    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("poller already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    Stored(Sample),
    QuotaReached { day: DayBucket, count: usize },
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct PollStatus {
    pub running: bool,
    pub interval_seconds: u64,
    pub ticks: u64,
    pub successes: u64,
    pub failures: u64,
    pub skipped: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_sweep_evicted: Option<usize>,
}

/// Read-only view of a poller's status, cheap to clone into request state.
#[derive(Clone)]
pub struct PollMonitor {
    shared: Arc<StdMutex<PollStatus>>,
}

impl PollMonitor {
    pub fn status(&self) -> PollStatus {
        lock_status(&self.shared).clone()
    }
}

struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

pub struct Poller {
    shared: Arc<StdMutex<PollStatus>>,
    worker: Option<WorkerHandle>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StdMutex::new(PollStatus::default())),
            worker: None,
        }
    }

    pub fn monitor(&self) -> PollMonitor {
        PollMonitor {
            shared: self.shared.clone(),
        }
    }

    /// Spawn the loop on the current tokio runtime. The first poll is immediate.
    pub fn start<S: PositionSource>(
        &mut self,
        source: Arc<S>,
        store: Arc<dyn SampleStore>,
        settings: PollSettings,
    ) -> Result<(), PollerError> {
        if self.worker.is_some() {
            return Err(PollerError::AlreadyRunning);
        }

        {
            let mut status = lock_status(&self.shared);
            status.running = true;
            status.interval_seconds = settings.interval.as_secs();
        }

        let shared = self.shared.clone();
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(run_poll_loop(source, store, settings, shared, stop_rx));

        self.worker = Some(WorkerHandle { stop_tx, join });
        info!("Poller started");
        Ok(())
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if let Err(e) = worker.join.await {
                error!("Poller task ended abnormally: {}", e);
            }
        }
        lock_status(&self.shared).running = false;
        info!("Poller stopped");
    }
}

/// One fetch → normalize → append cycle, honouring the day quota.
pub async fn poll_once<S: PositionSource>(
    source: &S,
    store: &dyn SampleStore,
    day_quota: Option<usize>,
) -> Result<TickOutcome, PollError> {
    if let Some(quota) = day_quota {
        let day = DayBucket::today();
        let count = store.count_day(day)?;
        if count >= quota {
            return Ok(TickOutcome::QuotaReached { day, count });
        }
    }

    let payload = source.fetch().await?;
    let sample = parse_payload(&payload, Utc::now())?;
    store.append(&sample)?;
    Ok(TickOutcome::Stored(sample))
}

/// Evict everything before the policy cutoff relative to `today`.
pub fn sweep(
    store: &dyn SampleStore,
    policy: RetentionPolicy,
    today: DayBucket,
) -> Result<usize, StoreError> {
    let cutoff = policy.cutoff(today);
    let evicted = store.evict_older_than(cutoff)?;
    if evicted > 0 {
        info!("Retention sweep evicted {} samples before {}", evicted, cutoff);
    }
    Ok(evicted)
}

async fn run_poll_loop<S: PositionSource>(
    source: Arc<S>,
    store: Arc<dyn SampleStore>,
    settings: PollSettings,
    shared: Arc<StdMutex<PollStatus>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut next_tick = Instant::now();

    loop {
        let outcome = poll_once(source.as_ref(), store.as_ref(), settings.day_quota).await;
        let tick = record_outcome(&shared, outcome);

        if let Some(policy) = settings.retention {
            if tick % u64::from(policy.sweep_every.max(1)) == 0 {
                match sweep(store.as_ref(), policy, DayBucket::today()) {
                    Ok(evicted) => lock_status(&shared).last_sweep_evicted = Some(evicted),
                    Err(e) => error!("Retention sweep failed: {}", e),
                }
            }
        }

        next_tick += settings.interval;
        let now = Instant::now();
        if next_tick < now {
            // A fetch outlasted the interval; poll again right away instead of bursting.
            next_tick = now;
        }

        // A dropped sender counts as a stop request too.
        let should_stop = tokio::select! {
            _ = sleep_until(next_tick) => false,
            _ = &mut stop_rx => true,
        };
        if should_stop {
            break;
        }
    }

    lock_status(&shared).running = false;
}

fn record_outcome(
    shared: &StdMutex<PollStatus>,
    outcome: Result<TickOutcome, PollError>,
) -> u64 {
    let mut status = lock_status(shared);
    status.ticks += 1;

    match outcome {
        Ok(TickOutcome::Stored(sample)) => {
            debug!(
                "Stored sample at {} ({:.4}, {:.4})",
                sample.captured_at, sample.latitude, sample.longitude
            );
            status.successes += 1;
            status.consecutive_failures = 0;
            status.last_success = Some(Utc::now());
        }
        Ok(TickOutcome::QuotaReached { day, count }) => {
            debug!("Day {} already holds {} samples, skipping", day, count);
            status.skipped += 1;
        }
        Err(e) => {
            match &e {
                PollError::Store(_) => error!("Poll failed: {}", e),
                _ => warn!("Poll failed: {}", e),
            }
            status.failures += 1;
            status.consecutive_failures += 1;
            status.last_error = Some(e.to_string());
        }
    }

    status.ticks
}

fn lock_status(shared: &StdMutex<PollStatus>) -> MutexGuard<'_, PollStatus> {
    // Status is plain counters; a panic mid-update cannot leave it unusable.
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract::{day, sample_at};
    use crate::store::MemoryStore;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Fails the first `failures` calls, then returns `payload`.
    struct ScriptedSource {
        failures: usize,
        payload: Value,
        calls: AtomicUsize,
        seen: mpsc::UnboundedSender<Instant>,
    }

    impl ScriptedSource {
        fn new(failures: usize, payload: Value) -> (Arc<Self>, mpsc::UnboundedReceiver<Instant>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let source = Arc::new(Self {
                failures,
                payload,
                calls: AtomicUsize::new(0),
                seen: tx,
            });
            (source, rx)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PositionSource for ScriptedSource {
        async fn fetch(&self) -> Result<Value, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.seen.send(Instant::now());
            if call < self.failures {
                Err(FetchError::Timeout)
            } else {
                Ok(self.payload.clone())
            }
        }
    }

    fn flat_payload() -> Value {
        json!({ "latitude": 12.0, "longitude": 34.0, "altitude": 420.0, "velocity": 27600.0 })
    }

    fn settings(interval_secs: u64) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(interval_secs),
            day_quota: None,
            retention: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_after_consecutive_failures() {
        let store: Arc<dyn SampleStore> = Arc::new(MemoryStore::with_capacity(100));
        let (source, mut seen) = ScriptedSource::new(2, flat_payload());

        let mut poller = Poller::new();
        poller
            .start(source.clone(), store.clone(), settings(5))
            .unwrap();

        let first = seen.recv().await.unwrap();
        let _second = seen.recv().await.unwrap();
        let third = seen.recv().await.unwrap();
        assert!(third - first >= Duration::from_secs(10));

        poller.stop().await;

        let status = poller.monitor().status();
        assert!(!status.running);
        assert_eq!(status.failures, 2);
        assert_eq!(status.successes, 1);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.unwrap().contains("timed out"));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_the_wait() {
        let store: Arc<dyn SampleStore> = Arc::new(MemoryStore::with_capacity(100));
        let (source, mut seen) = ScriptedSource::new(0, flat_payload());

        let mut poller = Poller::new();
        poller.start(source.clone(), store, settings(3_600)).unwrap();
        seen.recv().await.unwrap();

        let before = Instant::now();
        poller.stop().await;
        assert!(before.elapsed() < Duration::from_secs(1));
        assert!(!poller.monitor().status().running);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_a_second_start() {
        let store: Arc<dyn SampleStore> = Arc::new(MemoryStore::with_capacity(100));
        let (source, _seen) = ScriptedSource::new(0, flat_payload());

        let mut poller = Poller::new();
        poller
            .start(source.clone(), store.clone(), settings(60))
            .unwrap();
        assert!(matches!(
            poller.start(source, store, settings(60)),
            Err(PollerError::AlreadyRunning)
        ));
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn parse_failures_are_recorded_not_fatal() {
        let store: Arc<dyn SampleStore> = Arc::new(MemoryStore::with_capacity(100));
        let (source, mut seen) = ScriptedSource::new(0, json!({ "message": "failure" }));

        let mut poller = Poller::new();
        poller.start(source, store.clone(), settings(1)).unwrap();
        seen.recv().await.unwrap();
        seen.recv().await.unwrap();
        poller.stop().await;

        let status = poller.monitor().status();
        assert!(status.failures >= 2);
        assert!(status.last_error.unwrap().contains("missing field"));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_expired_days() {
        let store: Arc<dyn SampleStore> = Arc::new(MemoryStore::with_capacity(100));
        store.append(&sample_at(1_000, 0.0)).unwrap();
        let (source, mut seen) = ScriptedSource::new(0, flat_payload());

        let mut poller = Poller::new();
        let mut settings = settings(60);
        settings.retention = Some(RetentionPolicy {
            days: 1,
            sweep_every: 1,
        });
        poller.start(source, store.clone(), settings).unwrap();

        seen.recv().await.unwrap();
        poller.stop().await;

        assert_eq!(poller.monitor().status().last_sweep_evicted, Some(1));
        assert_eq!(store.distinct_days().unwrap(), vec![DayBucket::today()]);
    }

    #[tokio::test]
    async fn quota_skips_the_fetch() {
        let store = MemoryStore::with_capacity(100);
        let (source, _seen) = ScriptedSource::new(0, flat_payload());

        let first = poll_once(source.as_ref(), &store, Some(1)).await.unwrap();
        assert!(matches!(first, TickOutcome::Stored(_)));

        let second = poll_once(source.as_ref(), &store, Some(1)).await.unwrap();
        assert!(matches!(second, TickOutcome::QuotaReached { count: 1, .. }));
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn retention_keeps_yesterday_when_cutoff_is_today() {
        let store = MemoryStore::with_capacity(100);
        let today = day("2026-10-19");
        let yesterday = day("2026-10-18");
        for d in [yesterday, today] {
            let at = d.date().and_hms_opt(8, 0, 0).unwrap().and_utc();
            store.append(&Sample::new(at, 1.0, 1.0, None, None)).unwrap();
        }

        let policy = RetentionPolicy {
            days: 1,
            sweep_every: 1,
        };
        assert_eq!(policy.cutoff(today), yesterday);
        assert_eq!(sweep(&store, policy, today).unwrap(), 0);

        assert_eq!(store.evict_older_than(today).unwrap(), 1);
        assert_eq!(store.distinct_days().unwrap(), vec![today]);
    }
}
