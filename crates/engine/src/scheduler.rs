//! Background polling for scheduled jobs.
//!
//! Every tick spawns a batch: wait a random jitter, fetch pending jobs, run
//! them concurrently. [`PollingScheduler::join`] resolves once the scheduler
//! is stopped and no batch is in flight.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use outpost_api::PendingJobsFeed;
use outpost_types::{ApiDefinition, ExecutionResponse};
use outpost_util::PollingConfig;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::EngineError;

/// Runs one scheduled job definition.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute_job(&self, definition: ApiDefinition) -> Result<ExecutionResponse, EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub max_jitter: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self { interval: config.interval, max_jitter: config.max_jitter }
    }
}

/// Outcome counts of one polled batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

struct Inner {
    feed: Arc<dyn PendingJobsFeed>,
    executor: Arc<dyn JobExecutor>,
    settings: SchedulerSettings,
    running: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn is_idle(&self) -> bool {
        !self.running.load(Ordering::SeqCst) && self.in_flight.load(Ordering::SeqCst) == 0
    }

    async fn poll_once(&self) -> BatchSummary {
        let jobs = match self.feed.fetch_pending_jobs().await {
            Ok(jobs) => jobs,
            Err(err) => {
                error!(error = %err, "failed to fetch pending jobs");
                return BatchSummary::default();
            }
        };
        if jobs.is_empty() {
            debug!("no pending jobs");
            return BatchSummary::default();
        }

        info!(jobs = jobs.len(), "running scheduled jobs");
        let runs = jobs.into_iter().map(|definition| {
            let executor = self.executor.clone();
            async move {
                let api_id = definition.api.id.clone();
                (api_id, executor.execute_job(definition).await)
            }
        });

        let mut summary = BatchSummary::default();
        for (api_id, result) in join_all(runs).await {
            match result {
                Ok(response) if response.state.has_error() => {
                    summary.failed += 1;
                    warn!(api_id = %api_id, error = ?response.state.first_error(), "scheduled job finished with an error");
                }
                Ok(_) => {
                    summary.succeeded += 1;
                    debug!(api_id = %api_id, "scheduled job finished");
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(api_id = %api_id, error = %err, "scheduled job failed");
                }
            }
        }
        info!(succeeded = summary.succeeded, failed = summary.failed, "scheduled batch finished");
        summary
    }
}

/// Counts one batch as in flight until dropped, even if the batch panics.
struct InFlight(Arc<Inner>);

impl InFlight {
    fn begin(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(inner.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Polls the control plane for scheduled jobs on a fixed interval.
#[derive(Clone)]
pub struct PollingScheduler {
    inner: Arc<Inner>,
}

impl PollingScheduler {
    pub fn new(feed: Arc<dyn PendingJobsFeed>, executor: Arc<dyn JobExecutor>, settings: SchedulerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                feed,
                executor,
                settings,
                running: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Starts ticking. The first tick fires one interval from now. Must be
    /// called inside a tokio runtime; calling it while running does nothing.
    /// A zero interval is refused and the scheduler stays stopped.
    pub fn start(&self) {
        let period = self.inner.settings.interval;
        if period.is_zero() {
            error!("polling interval must be greater than zero, not starting schedule polling");
            return;
        }

        // The flag and the handle change together under the slot lock so a
        // concurrent stop always sees the ticker it has to abort.
        let mut slot = self.ticker_slot();
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            interval_ms = period.as_millis() as u64,
            max_jitter_ms = self.inner.settings.max_jitter.as_millis() as u64,
            "starting schedule polling"
        );

        let inner = self.inner.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                // Count the batch before checking the flag so join never
                // misses a batch that started concurrently with stop.
                let batch = InFlight::begin(&inner);
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::spawn(async move {
                    tokio::time::sleep(random_jitter(batch.0.settings.max_jitter)).await;
                    batch.0.poll_once().await;
                    drop(batch);
                });
            }
        }));
    }

    /// Stops ticking. Batches already in flight keep running.
    pub fn stop(&self) {
        let handle = {
            let mut slot = self.ticker_slot();
            if !self.inner.running.swap(false, Ordering::SeqCst) {
                return;
            }
            slot.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        info!(in_flight = self.in_flight(), "stopped schedule polling");
        self.inner.idle.notify_waiters();
    }

    fn ticker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves once the scheduler is stopped and no batch is in flight.
    pub async fn join(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Like [`join`](Self::join) but gives up after `timeout`. Returns whether
    /// the scheduler drained.
    pub async fn join_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.join()).await.is_ok()
    }

    /// Fetches and runs one batch right away.
    pub async fn poll_once(&self) -> BatchSummary {
        let _batch = InFlight::begin(&self.inner);
        self.inner.poll_once().await
    }
}
