//! Job records and the value types they are built from.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
///
/// Transitions only move forward: `Queued -> Processing -> {Completed, Failed}`.
/// The single exception is crash recovery, which puts an abandoned
/// `Processing` job back to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Accepted MIME types and the kind of document each maps to.
const ALLOWED_MIME_TYPES: &[(&str, SourceKind)] = &[
    ("application/pdf", SourceKind::Pdf),
    ("image/png", SourceKind::Image),
    ("image/jpeg", SourceKind::Image),
    ("image/tiff", SourceKind::Image),
    ("image/bmp", SourceKind::Image),
    ("image/webp", SourceKind::Image),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Image,
    Pdf,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Image => "image",
            SourceKind::Pdf => "pdf",
        }
    }

    /// Maps a MIME type to a document kind. Returns `None` for anything we
    /// do not accept.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        ALLOWED_MIME_TYPES
            .iter()
            .find(|(allowed, _)| *allowed == mime)
            .map(|(_, kind)| *kind)
    }

    /// Detects the document kind from a file extension using `mime_guess`.
    pub fn from_path(path: &Path) -> Option<Self> {
        mime_guess::from_path(path)
            .iter()
            .find_map(|mime| Self::from_mime(mime.essence_str()))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(SourceKind::Image),
            "pdf" => Ok(SourceKind::Pdf),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

/// Requested recognition mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    Text,
    Table,
    /// Text pass plus table pass, merged. Backends with a unified output run
    /// it as one pass.
    #[default]
    Auto,
}

impl OcrMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMode::Text => "text",
            OcrMode::Table => "table",
            OcrMode::Auto => "auto",
        }
    }
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OcrMode::Text),
            "table" => Ok(OcrMode::Table),
            "auto" => Ok(OcrMode::Auto),
            other => Err(format!("unknown OCR mode '{}'", other)),
        }
    }
}

/// Identifier of an OCR backend. Stored on the job at submission time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// GLM-OCR hosted on a HuggingFace inference endpoint.
    #[default]
    #[serde(alias = "hf")]
    HuggingFace,
    /// DeepSeek-OCR hosted endpoint; emits tables inline in one pass.
    DeepSeek,
    /// GLM-OCR served by a local Ollama instance.
    Ollama,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::HuggingFace => "huggingface",
            BackendKind::DeepSeek => "deepseek",
            BackendKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "huggingface" | "hf" => Ok(BackendKind::HuggingFace),
            "deepseek" => Ok(BackendKind::DeepSeek),
            "ollama" => Ok(BackendKind::Ollama),
            other => Err(format!("unknown OCR backend '{}'", other)),
        }
    }
}

/// Recognized markdown for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-based position of the page in the source document.
    pub page_index: u32,
    pub text: String,
    pub mode_used: OcrMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Decode,
    Backend,
    Timeout,
    Internal,
}

/// Structured failure reason stored on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_index: Option<u32>,
    /// Whether the last underlying error was transient. Retries were already
    /// exhausted by the time this is recorded.
    #[serde(default)]
    pub retryable: bool,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A job record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
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
    pub result: Option<Vec<PageResult>>,
    pub error: Option<JobFailure>,
    pub retry_count: u32,
    /// Worker currently (or last) holding the claim.
    pub claimed_by: Option<String>,
}
