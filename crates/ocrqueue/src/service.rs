//! Caller-facing facade over the job store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ServiceError;
use crate::job::{BackendKind, Job, JobFailure, JobState, OcrMode, SourceKind};
use crate::output::JobOutput;
use crate::store::{Admission, JobStore, NewJob};
use crate::worker::WorkerPool;

/// Largest page size accepted by [`JobService::list`].
pub const MAX_PAGE_SIZE: i64 = 100;

/// How far into the file a PDF header may appear.
const PDF_HEADER_WINDOW: usize = 1024;

/// Submission policy, fixed when the service is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitSettings {
    pub max_file_size: u64,
    pub max_queue_depth: Option<u64>,
    /// Backend stamped on every new job.
    pub backend: BackendKind,
    pub default_mode: OcrMode,
}

impl SubmitSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_file_size: config.max_file_size_bytes(),
            max_queue_depth: config.max_queue_depth,
            backend: config.backend,
            default_mode: config.default_mode,
        }
    }
}

/// Status of a job without its result body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: String,
    pub state: JobState,
    pub source_kind: SourceKind,
    pub mode: OcrMode,
    pub backend: BackendKind,
    pub filename: Option<String>,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub page_count: Option<u32>,
    pub retry_count: u32,
    pub error: Option<JobFailure>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            state: job.state,
            source_kind: job.source_kind,
            mode: job.mode,
            backend: job.backend,
            filename: job.filename,
            file_size: job.file_size,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            page_count: job.page_count,
            retry_count: job.retry_count,
            error: job.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobListing {
    pub items: Vec<JobView>,
    pub total: u64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub worker_count: usize,
    pub active_workers: usize,
    pub queue_depth: u64,
    pub database_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct JobService {
    store: JobStore,
    settings: SubmitSettings,
}

impl JobService {
    pub fn new(store: JobStore, settings: SubmitSettings) -> Self {
        Self { store, settings }
    }

    pub fn from_config(store: JobStore, config: &Config) -> Self {
        Self::new(store, SubmitSettings::from_config(config))
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn settings(&self) -> &SubmitSettings {
        &self.settings
    }

    /// Validates and queues a document. `mode` falls back to the configured
    /// default. Returns as soon as the job is stored.
    pub fn submit(
        &self,
        bytes: Vec<u8>,
        kind: SourceKind,
        mode: Option<OcrMode>,
    ) -> Result<String, ServiceError> {
        self.submit_with_name(bytes, kind, mode, None)
    }

    pub fn submit_with_name(
        &self,
        bytes: Vec<u8>,
        kind: SourceKind,
        mode: Option<OcrMode>,
        filename: Option<String>,
    ) -> Result<String, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::EmptyFile);
        }
        self.check_size(bytes.len() as u64)?;

        match sniff_kind(&bytes) {
            Some(detected) if detected == kind => {}
            _ => {
                return Err(ServiceError::UnsupportedFormat(format!(
                    "content is not a supported {} file",
                    kind
                )))
            }
        }


        let mode = mode.unwrap_or(self.settings.default_mode);
        let new_job = NewJob {
            source_kind: kind,
            mode,
            backend: self.settings.backend,
            filename,
            payload: bytes,
        };
        let id = match self.store.insert_bounded(new_job, self.settings.max_queue_depth)? {
            Admission::Queued(id) => id,
            Admission::Full { depth, limit } => return Err(ServiceError::QueueFull { depth, limit }),
        };

        info!(job_id = %id, kind = %kind, mode = %mode, backend = %self.settings.backend, "Job submitted");
        Ok(id)
    }

    /// Reads `path` and submits it. The kind comes from the extension,
    /// falling back to the file's magic bytes.
    pub fn submit_file(&self, path: &Path, mode: Option<OcrMode>) -> Result<String, ServiceError> {
        let read_err = |source| ServiceError::ReadFile {
            path: path.to_path_buf(),
            source,
        };

        let size = std::fs::metadata(path).map_err(read_err)?.len();
        self.check_size(size)?;
        let bytes = std::fs::read(path).map_err(read_err)?;

        let kind = SourceKind::from_path(path)
            .or_else(|| sniff_kind(&bytes))
            .ok_or_else(|| ServiceError::UnsupportedFormat(path.display().to_string()))?;
        debug!(path = %path.display(), kind = %kind, "Submitting file");

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        self.submit_with_name(bytes, kind, mode, filename)
    }

    pub fn status(&self, id: &str) -> Result<JobView, ServiceError> {
        Ok(self.find(id)?.into())
    }

    /// The assembled output of a completed job.
    pub fn result(&self, id: &str) -> Result<JobOutput, ServiceError> {
        let job = self.find(id)?;
        match job.state {
            JobState::Queued | JobState::Processing => Err(ServiceError::NotReady {
                id: job.id,
                state: job.state,
            }),
            JobState::Failed => {
                let failure = job.error.unwrap_or_else(|| JobFailure {
                    kind: crate::job::FailureKind::Internal,
                    message: "failure reason was not recorded".to_string(),
                    page_index: None,
                    retryable: false,
                });
                Err(ServiceError::JobFailed {
                    id: job.id,
                    failure,
                })
            }
            JobState::Completed => Ok(JobOutput::new(job.id, job.result.unwrap_or_default())),
        }
    }

    /// Lists jobs newest first. `page` is 1-based.
    pub fn list(
        &self,
        state: Option<JobState>,
        page: i64,
        page_size: i64,
    ) -> Result<JobListing, ServiceError> {
        if page < 1 {
            return Err(ServiceError::InvalidPagination(
                "page must be >= 1".to_string(),
            ));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ServiceError::InvalidPagination(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let (jobs, total) = self.store.list(state, page as u64, page_size as u64)?;
        Ok(JobListing {
            items: jobs.into_iter().map(JobView::from).collect(),
            total,
            page,
            page_size,
        })
    }

    /// Removes the job. A worker still processing it keeps running but its
    /// outcome is dropped.
    pub fn delete(&self, id: &str) -> Result<(), ServiceError> {
        if self.store.delete(id)? {
            info!(job_id = %id, "Job deleted");
            Ok(())
        } else {
            Err(ServiceError::NotFound(id.to_string()))
        }
    }

    pub fn queue_depth(&self) -> Result<u64, ServiceError> {
        Ok(self.store.count_by_state(JobState::Queued)?)
    }

    /// Without a running pool the worker count is 0.
    pub fn health(&self, pool: Option<&WorkerPool>) -> Result<HealthReport, ServiceError> {
        Ok(HealthReport {
            status: "ok",
            worker_count: pool.map_or(0, WorkerPool::worker_count),
            active_workers: pool.map_or(0, WorkerPool::active_workers),
            queue_depth: self.queue_depth()?,
            database_path: self.store.database_path().map(Path::to_path_buf),
        })
    }

    fn check_size(&self, size: u64) -> Result<(), ServiceError> {
        if size > self.settings.max_file_size {
            return Err(ServiceError::SizeExceeded {
                size,
                limit: self.settings.max_file_size,
            });
        }
        Ok(())
    }

    fn find(&self, id: &str) -> Result<Job, ServiceError> {
        self.store
            .get(id)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }
}

/// Detects the document kind from magic bytes.
pub fn sniff_kind(bytes: &[u8]) -> Option<SourceKind> {
    let head = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if head.windows(5).any(|w| w == b"%PDF-") {
        return Some(SourceKind::Pdf);
    }

    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png
        | image::ImageFormat::Jpeg
        | image::ImageFormat::Tiff
        | image::ImageFormat::Bmp
        | image::ImageFormat::WebP => Some(SourceKind::Image),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const PDF: &[u8] = b"%PDF-1.4\n%fake body\n";

    fn png() -> Vec<u8> {
        let img = ::image::RgbImage::new(2, 2);
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, ::image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn service() -> JobService {
        service_with(SubmitSettings {
            max_file_size: 1024,
            max_queue_depth: None,
            backend: BackendKind::Ollama,
            default_mode: OcrMode::Auto,
        })
    }

    fn service_with(settings: SubmitSettings) -> JobService {
        JobService::new(JobStore::in_memory().unwrap(), settings)
    }

    #[test]
    fn test_submit_queues_job_with_configured_backend() {
        let svc = service();
        let id = svc.submit(PDF.to_vec(), SourceKind::Pdf, None).unwrap();

        let view = svc.status(&id).unwrap();
        assert_eq!(view.state, JobState::Queued);
        assert_eq!(view.backend, BackendKind::Ollama);
        assert_eq!(view.mode, OcrMode::Auto);
        assert_eq!(view.file_size, PDF.len() as u64);
        assert!(view.started_at.is_none());
    }

    #[test]
    fn test_submit_rejects_empty_and_oversized() {
        let svc = service();
        assert!(matches!(
            svc.submit(Vec::new(), SourceKind::Pdf, None),
            Err(ServiceError::EmptyFile)
        ));

        let mut big = PDF.to_vec();
        big.resize(2048, b' ');
        assert!(matches!(
            svc.submit(big, SourceKind::Pdf, None),
            Err(ServiceError::SizeExceeded { size: 2048, limit: 1024 })
        ));
        assert_eq!(svc.list(None, 1, 10).unwrap().total, 0);
    }

    #[test]
    fn test_submit_rejects_mismatched_content() {
        let svc = service();
        assert!(matches!(
            svc.submit(b"hello world".to_vec(), SourceKind::Pdf, None),
            Err(ServiceError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            svc.submit(PDF.to_vec(), SourceKind::Image, None),
            Err(ServiceError::UnsupportedFormat(_))
        ));
        assert!(svc.submit(png(), SourceKind::Image, Some(OcrMode::Text)).is_ok());
    }

    #[test]
    fn test_queue_full() {
        let svc = service_with(SubmitSettings {
            max_file_size: 1024,
            max_queue_depth: Some(2),
            backend: BackendKind::Ollama,
            default_mode: OcrMode::Text,
        });
        svc.submit(PDF.to_vec(), SourceKind::Pdf, None).unwrap();
        svc.submit(PDF.to_vec(), SourceKind::Pdf, None).unwrap();

        assert!(matches!(
            svc.submit(PDF.to_vec(), SourceKind::Pdf, None),
            Err(ServiceError::QueueFull { depth: 2, limit: 2 })
        ));

        // Claimed jobs no longer count towards the limit.
        svc.store().claim_next("w").unwrap().unwrap();
        assert!(svc.submit(PDF.to_vec(), SourceKind::Pdf, None).is_ok());
    }

    #[test]
    fn test_result_states() {
        let svc = service();
        assert!(matches!(svc.result("nope"), Err(ServiceError::NotFound(_))));

        let id = svc.submit(PDF.to_vec(), SourceKind::Pdf, None).unwrap();
        assert!(matches!(
            svc.result(&id),
            Err(ServiceError::NotReady { state: JobState::Queued, .. })
        ));

        let claim = svc.store().claim_next("w").unwrap().unwrap();
        assert!(matches!(
            svc.result(&id),
            Err(ServiceError::NotReady { state: JobState::Processing, .. })
        ));

        let pages = vec![crate::job::PageResult {
            page_index: 0,
            text: "# Heading\nbody".to_string(),
            mode_used: OcrMode::Auto,
        }];
        svc.store().complete(&claim, &pages, 0).unwrap();

        let output = svc.result(&id).unwrap();
        assert_eq!(output.markdown, "# Heading\nbody");
        assert_eq!(output.sections.len(), 1);
        assert_eq!(output.sections[0].heading, "Heading");
    }

    #[test]
    fn test_result_of_failed_job() {
        let svc = service();
        let id = svc.submit(PDF.to_vec(), SourceKind::Pdf, None).unwrap();
        let claim = svc.store().claim_next("w").unwrap().unwrap();
        let failure = crate::error::JobError::Decode(crate::error::DecodeError::NoPages).to_failure();
        svc.store().fail(&claim, &failure, None, 0).unwrap();

        match svc.result(&id) {
            Err(ServiceError::JobFailed { failure: got, .. }) => assert_eq!(got, failure),
            other => panic!("expected JobFailed, got {:?}", other.map(|o| o.id)),
        }
    }

    #[test]
    fn test_list_validates_pagination() {
        let svc = service();
        assert!(matches!(svc.list(None, 0, 10), Err(ServiceError::InvalidPagination(_))));
        assert!(matches!(svc.list(None, 1, 0), Err(ServiceError::InvalidPagination(_))));
        assert!(matches!(svc.list(None, 1, -3), Err(ServiceError::InvalidPagination(_))));
        assert!(matches!(svc.list(None, 1, 101), Err(ServiceError::InvalidPagination(_))));
        assert!(svc.list(None, 1, 100).is_ok());
    }

    #[test]
    fn test_list_filters_by_state() {
        let svc = service();
        svc.submit(PDF.to_vec(), SourceKind::Pdf, None).unwrap();
        svc.submit(PDF.to_vec(), SourceKind::Pdf, None).unwrap();
        svc.store().claim_next("w").unwrap().unwrap();

        assert_eq!(svc.list(Some(JobState::Queued), 1, 10).unwrap().total, 1);
        assert_eq!(svc.list(Some(JobState::Processing), 1, 10).unwrap().total, 1);
        assert_eq!(svc.list(None, 1, 10).unwrap().items.len(), 2);
    }

    #[test]
    fn test_delete() {
        let svc = service();
        let id = svc.submit(PDF.to_vec(), SourceKind::Pdf, None).unwrap();
        svc.delete(&id).unwrap();
        assert!(matches!(svc.status(&id), Err(ServiceError::NotFound(_))));
        assert!(matches!(svc.delete(&id), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_submit_file_infers_kind() {
        let dir = TempDir::new().unwrap();
        let svc = service();

        let pdf_path = dir.path().join("scan.pdf");
        std::fs::File::create(&pdf_path).unwrap().write_all(PDF).unwrap();
        let id = svc.submit_file(&pdf_path, None).unwrap();
        let view = svc.status(&id).unwrap();
        assert_eq!(view.source_kind, SourceKind::Pdf);
        assert_eq!(view.filename.as_deref(), Some("scan.pdf"));

        // No extension: falls back to magic bytes.
        let img_path = dir.path().join("upload");
        std::fs::write(&img_path, png()).unwrap();
        let id = svc.submit_file(&img_path, None).unwrap();
        assert_eq!(svc.status(&id).unwrap().source_kind, SourceKind::Image);

        let txt_path = dir.path().join("notes.txt");
        std::fs::write(&txt_path, "just text").unwrap();
        assert!(matches!(
            svc.submit_file(&txt_path, None),
            Err(ServiceError::UnsupportedFormat(_))
        ));

        assert!(matches!(
            svc.submit_file(&dir.path().join("missing.pdf"), None),
            Err(ServiceError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_health_without_pool() {
        let svc = service();
        svc.submit(PDF.to_vec(), SourceKind::Pdf, None).unwrap();
        let health = svc.health(None).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.queue_depth, 1);
        assert_eq!(health.worker_count, 0);
        assert!(health.database_path.is_none());
    }

    #[test]
    fn test_sniff_kind() {
        assert_eq!(sniff_kind(PDF), Some(SourceKind::Pdf));
        assert_eq!(sniff_kind(&png()), Some(SourceKind::Image));
        assert_eq!(sniff_kind(b"GIF89a...."), None);
        assert_eq!(sniff_kind(b"plain"), None);
    }
}
