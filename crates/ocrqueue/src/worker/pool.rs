use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{blocking, JobRunner};
use crate::config::Config;
use crate::error::{JobError, WorkerError};
use crate::store::{Claim, JobStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub worker_count: usize,
    /// First sleep after finding the queue empty.
    pub idle_backoff_min: Duration,
    /// Idle sleeps double up to this ceiling and reset on the next claim.
    pub idle_backoff_max: Duration,
    /// A `processing` claim older than this is considered abandoned.
    pub stale_claim_after: Duration,
    pub recovery_interval: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            idle_backoff_min: Duration::from_millis(config.poll.idle_backoff_min_ms),
            idle_backoff_max: Duration::from_millis(config.poll.idle_backoff_max_ms),
            stale_claim_after: config.stale_claim_after(),
            recovery_interval: Duration::from_secs(config.poll.recovery_interval_secs),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Fixed set of tokio tasks pulling jobs from the store.
///
/// Workers claim jobs directly from SQLite, so there is no in-memory queue to
/// lose on a crash. A sweeper task periodically re-queues claims abandoned by
/// a previous process.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
    worker_count: usize,
}

impl WorkerPool {
    /// Recovers abandoned claims, then spawns the workers and the sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(runner: Arc<JobRunner>, settings: PoolSettings) -> Result<Self, WorkerError> {
        if settings.worker_count == 0 {
            return Err(WorkerError::NoWorkers);
        }

        let store = runner.store().clone();
        let stale = stale_cutoff(settings.stale_claim_after);
        let recovered = blocking(move || store.requeue_stale(stale)).await?;
        if recovered > 0 {
            info!("Recovered {} abandoned jobs at startup", recovered);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let active = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(settings.worker_count);

        for i in 0..settings.worker_count {
            let id = worker_id(i);
            let span = info_span!("worker", worker_id = %id);
            let runner = Arc::clone(&runner);
            let shutdown_rx = shutdown_rx.clone();
            let active = Arc::clone(&active);

            workers.push(tokio::spawn(
                run_worker(id, runner, settings, shutdown_rx, active).instrument(span),
            ));
        }

        let sweeper = tokio::spawn(run_sweeper(
            runner.store().clone(),
            settings,
            shutdown_rx,
        ));

        info!("Started {} workers", settings.worker_count);

        Ok(Self {
            workers,
            sweeper: Some(sweeper),
            shutdown,
            active,
            worker_count: settings.worker_count,
        })
    }

    /// Stops claiming new jobs. Jobs already claimed run to completion.
    pub fn shutdown(&self) {
        if !self.is_shutdown() {
            info!("Shutting down worker pool...");
        }
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Signals shutdown and waits for every worker to finish its current job.
    pub async fn wait(mut self) {
        self.shutdown();

        for (i, worker) in std::mem::take(&mut self.workers).into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {}", i + 1, e);
            }
        }
        if let Some(sweeper) = self.sweeper.take() {
            if let Err(e) = sweeper.await {
                error!("Recovery sweeper panicked: {}", e);
            }
        }

        info!("All workers have stopped");
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Workers currently processing a job.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn worker_id(index: usize) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("worker-{}-{}", index + 1, &suffix[..8])
}

fn stale_cutoff(after: Duration) -> chrono::Duration {
    chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

/// Marks a worker as busy until dropped.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sleeps for `delay` unless shutdown is signalled first. Returns `false`
/// when the worker should stop.
async fn idle(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}

async fn run_worker(
    worker_id: String,
    runner: Arc<JobRunner>,
    settings: PoolSettings,
    mut shutdown: watch::Receiver<bool>,
    active: Arc<AtomicUsize>,
) {
    debug!("Worker started");
    let mut backoff = settings.idle_backoff_min;

    loop {
        if *shutdown.borrow() {
            debug!("Worker received shutdown signal");
            break;
        }

        let store = runner.store().clone();
        let claimant = worker_id.clone();

        match blocking(move || store.claim_next(&claimant)).await {
            Ok(Some(claim)) => {
                backoff = settings.idle_backoff_min;
                let _active = ActiveGuard::new(&active);
                debug!(job_id = %claim.job.id, "Claimed job");

                let held = claim.clone();
                match AssertUnwindSafe(runner.run(claim)).catch_unwind().await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(error = %e, "Failed to record job outcome"),
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        fail_panicked(runner.store(), held, message).await;
                    }
                }
            }
            Ok(None) => {
                if !idle(backoff, &mut shutdown).await {
                    break;
                }
                backoff = (backoff * 2).min(settings.idle_backoff_max);
            }
            Err(e) => {
                warn!(error = %e, "Failed to claim job");
                if !idle(settings.idle_backoff_max, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    debug!("Worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Records a job whose run panicked as an internal failure so it does not sit
/// in `processing` until the sweeper re-queues it.
async fn fail_panicked(store: &JobStore, claim: Claim, message: String) {
    let err = JobError::Internal(format!("Worker panicked: {}", message));
    error!(job_id = %claim.job.id, error = %err, "Job run panicked");

    let failure = err.to_failure();
    let store = store.clone();
    match blocking(move || store.fail(&claim, &failure, None, 0)).await {
        Ok(true) => {}
        Ok(false) => info!("Claim lost before write-back, outcome discarded"),
        Err(e) => error!(error = %e, "Failed to record job outcome"),
    }
}

async fn run_sweeper(store: JobStore, settings: PoolSettings, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(settings.recovery_interval);
    // The first tick fires immediately; startup recovery already ran.
    interval.tick().await;
    let stale = stale_cutoff(settings.stale_claim_after);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let store = store.clone();
                match blocking(move || store.requeue_stale(stale)).await {
                    Ok(0) => {}
                    Ok(n) => info!("Recovered {} abandoned jobs", n),
                    Err(e) => warn!(error = %e, "Recovery sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Recovery sweeper stopped");
                    break;
                }
            }
        }
    }
}
