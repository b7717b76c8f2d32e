use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, info_span, warn, Instrument};

use super::{blocking, RetryPolicy};
use crate::config::Config;
use crate::error::{ConfigError, JobError, WorkerError};
use crate::job::{Job, OcrMode, PageResult};
use crate::ocr::{BackendRegistry, Dispatcher, MergeStrategy, TableSplice};
use crate::processor::{PageImage, PagePipeline};
use crate::store::{Claim, JobStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Wall-clock budget for one job, decode included.
    pub job_timeout: Duration,
    /// Pages of one job recognized at the same time.
    pub page_concurrency: usize,
    pub retry: RetryPolicy,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            job_timeout: config.job_timeout(),
            page_concurrency: config.page_concurrency.max(1),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-job counters shared by the page tasks.
#[derive(Default)]
struct Progress {
    page_count: OnceLock<u32>,
    retries: AtomicU32,
}

/// Takes one claimed job from payload to a terminal state.
pub struct JobRunner {
    store: JobStore,
    pipeline: PagePipeline,
    registry: BackendRegistry,
    merge: Arc<dyn MergeStrategy>,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        store: JobStore,
        pipeline: PagePipeline,
        registry: BackendRegistry,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            pipeline,
            registry,
            merge: Arc::new(TableSplice),
            settings,
        }
    }

    pub fn from_config(store: JobStore, config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(
            store,
            PagePipeline::new(config.pdf_dpi),
            BackendRegistry::from_config(&config.backends)?,
            RunnerSettings::from_config(config),
        ))
    }

    pub fn with_merge_strategy(mut self, merge: Arc<dyn MergeStrategy>) -> Self {
        self.merge = merge;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Processes `claim` and writes the outcome back.
    ///
    /// Returns `Ok(false)` when the claim was lost in the meantime (job deleted
    /// or recovered by another sweep); the computed outcome is then discarded.
    /// Errors are reserved for store failures during write-back.
    pub async fn run(&self, claim: Claim) -> Result<bool, WorkerError> {
        let span = info_span!(
            "worker.job",
            job_id = %claim.job.id,
            backend = %claim.job.backend,
            mode = %claim.job.mode,
        );

        async move {
            let started = Instant::now();
            let progress = Progress::default();
            let timeout = self.settings.job_timeout;

            let outcome = match tokio::time::timeout(timeout, self.execute(&claim.job, &progress)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(JobError::Timeout(timeout)),
            };

            let retries = progress.retries.load(Ordering::Relaxed);
            let page_count = progress.page_count.get().copied();
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let store = self.store.clone();

            let written = match outcome {
                Ok(pages) => {
                    info!(pages = pages.len(), retries, elapsed_ms, "Job completed");
                    blocking(move || store.complete(&claim, &pages, retries)).await?
                }
                Err(err) => {
                    warn!(error = %err, retries, elapsed_ms, "Job failed");
                    let failure = err.to_failure();
                    blocking(move || store.fail(&claim, &failure, page_count, retries)).await?
                }
            };

            if !written {
                info!("Claim lost before write-back, outcome discarded");
            }
            Ok(written)
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, job: &Job, progress: &Progress) -> Result<Vec<PageResult>, JobError> {
        let backend = self
            .registry
            .get(job.backend)
            .ok_or_else(|| JobError::BackendUnavailable(job.backend.to_string()))?;

        let store = self.store.clone();
        let id = job.id.clone();
        let payload = blocking(move || store.load_payload(&id))
            .await
            .map_err(|e| JobError::Internal(format!("Failed to load payload: {}", e)))?
            .ok_or_else(|| JobError::Internal("Job payload is missing".to_string()))?;

        let pages = self.pipeline.split(payload, job.source_kind).await?;
        let _ = progress.page_count.set(pages.len() as u32);
        debug!(pages = pages.len(), "Document split into pages");

        let dispatcher = Dispatcher::new(backend, Arc::clone(&self.merge));
        let mode = job.mode;

        let mut results: Vec<PageResult> = stream::iter(pages)
            .map(|page| self.recognize_page(&dispatcher, page, mode, progress))
            .buffer_unordered(self.settings.page_concurrency.max(1))
            .try_collect()
            .await?;

        results.sort_by_key(|p| p.page_index);
        Ok(results)
    }

    /// Recognizes one page, retrying transient backend errors with backoff.
    async fn recognize_page(
        &self,
        dispatcher: &Dispatcher,
        page: PageImage,
        mode: OcrMode,
        progress: &Progress,
    ) -> Result<PageResult, JobError> {
        let policy = self.settings.retry;
        let mut attempt = 1;

        loop {
            match dispatcher.recognize(&page.data, mode).await {
                Ok(recognized) => {
                    return Ok(PageResult {
                        page_index: page.index,
                        text: recognized.text,
                        mode_used: recognized.mode_used,
                    });
                }
                Err(err) if err.retryable && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        page = page.index,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient backend error, retrying"
                    );
                    progress.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(JobError::Backend {
                        page_index: page.index,
                        source: err,
                    });
                }
            }
        }
    }
}
