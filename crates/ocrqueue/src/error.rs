use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::job::{FailureKind, JobFailure, JobState};

#[derive(Error, Debug)]
pub enum OcrQueueError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Logging setup failed: {0}")]
    Telemetry(String),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Failed to resolve backend token: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

/// The submitted document could not be split into page images.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read PDF: {0}")]
    CorruptPdf(String),

    #[error("Failed to read image: {0}")]
    CorruptImage(String),

    #[error("Document has no pages")]
    NoPages,

    #[error("Failed to render PDF pages: {0}")]
    Render(String),
}

/// A single recognition call failed.
///
/// `retryable` separates transient faults (network, timeouts, overloaded model
/// servers) from permanent rejections. The dispatcher never retries on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{backend} backend error: {message}")]
pub struct BackendError {
    pub backend: String,
    pub message: String,
    pub retryable: bool,
}

impl BackendError {
    pub fn transient(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            message: message.into(),
            retryable: false,
        }
    }
}

/// Why a claimed job could not be completed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("{0}")]
    Decode(#[from] DecodeError),

    #[error("Page {page_index}: {source}")]
    Backend {
        page_index: u32,
        #[source]
        source: BackendError,
    },

    #[error("Backend '{0}' is not configured")]
    BackendUnavailable(String),

    #[error("Job exceeded its time budget of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    Internal(String),
}

impl JobError {
    /// Converts the error into the structured failure recorded on the job.
    pub fn to_failure(&self) -> JobFailure {
        let (kind, page_index) = match self {
            JobError::Decode(_) => (FailureKind::Decode, None),
            JobError::Backend { page_index, .. } => (FailureKind::Backend, Some(*page_index)),
            JobError::BackendUnavailable(_) => (FailureKind::Backend, None),
            JobError::Timeout(_) => (FailureKind::Timeout, None),
            JobError::Internal(_) => (FailureKind::Internal, None),
        };
        let retryable = matches!(self, JobError::Backend { source, .. } if source.retryable);

        JobFailure {
            kind,
            message: self.to_string(),
            page_index,
            retryable,
        }
    }
}

/// Errors surfaced to callers of [`crate::service::JobService`].
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is not ready (state: {state})")]
    NotReady { id: String, state: JobState },

    #[error("Job {id} failed: {failure}")]
    JobFailed { id: String, failure: JobFailure },

    #[error("File size {size} bytes exceeds maximum of {limit} bytes")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("Queue is full ({depth} jobs queued, limit {limit})")]
    QueueFull { depth: u64, limit: u64 },

    #[error("Unsupported file type '{0}'")]
    UnsupportedFormat(String),

    #[error("Submitted file is empty")]
    EmptyFile,

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker pool requires at least one worker")]
    NoWorkers,

    #[error("Blocking task failed: {0}")]
    Join(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, OcrQueueError>;
