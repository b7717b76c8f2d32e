//! Test harness wiring store, service and workers around the mocks.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ocrqueue::{
    BackendKind, BackendRegistry, Job, JobRunner, JobService, JobStore, OcrMode, PagePipeline,
    PoolSettings, RetryPolicy, RunnerSettings, SourceKind, SubmitSettings, WorkerPool,
};

use super::mocks::{MockBackend, MockDecoder};

/// Minimal bytes that pass the service's PDF sniffing. The mock decoder never
/// looks at them.
pub const FAKE_PDF: &[u8] = b"%PDF-1.4\n%mock document\n";

/// Runner settings with millisecond backoffs so retry tests stay fast.
pub fn fast_runner_settings() -> RunnerSettings {
    RunnerSettings {
        job_timeout: Duration::from_secs(10),
        page_concurrency: 5,
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
    }
}

pub fn fast_pool_settings(worker_count: usize) -> PoolSettings {
    PoolSettings {
        worker_count,
        idle_backoff_min: Duration::from_millis(5),
        idle_backoff_max: Duration::from_millis(20),
        stale_claim_after: Duration::from_secs(60),
        recovery_interval: Duration::from_secs(60),
    }
}

pub fn submit_settings() -> SubmitSettings {
    SubmitSettings {
        max_file_size: 1024 * 1024,
        max_queue_depth: None,
        backend: BackendKind::Ollama,
        default_mode: OcrMode::Text,
    }
}

/// In-memory store plus service, with the mock backend registered as Ollama.
pub struct TestHarness {
    pub store: JobStore,
    pub service: JobService,
    pub backend: Arc<MockBackend>,
    pub decoder: Arc<MockDecoder>,
    pub runner_settings: RunnerSettings,
}

impl TestHarness {
    pub fn new(backend: MockBackend, decoder: MockDecoder) -> Self {
        let store = JobStore::in_memory().expect("Failed to open in-memory store");
        Self::with_store(store, backend, decoder)
    }

    pub fn with_store(store: JobStore, backend: MockBackend, decoder: MockDecoder) -> Self {
        let service = JobService::new(store.clone(), submit_settings());
        Self {
            store,
            service,
            backend: Arc::new(backend),
            decoder: Arc::new(decoder),
            runner_settings: fast_runner_settings(),
        }
    }

    pub fn runner(&self) -> Arc<JobRunner> {
        let mut registry = BackendRegistry::new();
        registry.register(BackendKind::Ollama, self.backend.clone());
        Arc::new(JobRunner::new(
            self.store.clone(),
            PagePipeline::with_decoder(self.decoder.clone()),
            registry,
            self.runner_settings,
        ))
    }

    pub async fn start_pool(&self, workers: usize) -> WorkerPool {
        self.start_pool_with(fast_pool_settings(workers)).await
    }

    pub async fn start_pool_with(&self, settings: PoolSettings) -> WorkerPool {
        WorkerPool::start(self.runner(), settings)
            .await
            .expect("Failed to start worker pool")
    }

    pub fn submit(&self, mode: OcrMode) -> String {
        self.service
            .submit(FAKE_PDF.to_vec(), SourceKind::Pdf, Some(mode))
            .expect("Failed to submit job")
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.store.get(id).expect("Failed to read job")
    }

    /// Polls until the job is completed or failed.
    pub async fn wait_terminal(&self, id: &str, timeout: Duration) -> Job {
        let store = self.store.clone();
        let found = wait_until(timeout, || {
            store
                .get(id)
                .ok()
                .flatten()
                .is_some_and(|job| job.state.is_terminal())
        })
        .await;
        assert!(found, "job {} did not finish within {:?}", id, timeout);
        self.job(id).expect("job disappeared")
    }
}

/// Polls `condition` every few milliseconds. Returns whether it became true
/// before `timeout`.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Runs `fut` with a hard upper bound so a hung pool fails the test instead
/// of stalling the suite.
pub async fn bounded<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation timed out")
}
