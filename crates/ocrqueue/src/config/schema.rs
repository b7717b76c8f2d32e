use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::{BackendKind, OcrMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// SQLite file; `~/.ocrqueue/data/ocrqueue.db` when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Backend assigned to newly submitted jobs.
    #[serde(default)]
    pub backend: BackendKind,
    /// Mode used when a submission does not name one.
    #[serde(default)]
    pub default_mode: OcrMode,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Reject submissions once this many jobs are queued. Unbounded when unset.
    #[serde(default)]
    pub max_queue_depth: Option<u64>,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// A `processing` claim older than this is considered abandoned.
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
    #[serde(default = "default_page_concurrency")]
    pub page_concurrency: usize,
    #[serde(default = "default_pdf_dpi")]
    pub pdf_dpi: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_worker_count() -> usize {
    2
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_job_timeout_secs() -> u64 {
    600
}

fn default_stale_claim_secs() -> u64 {
    900
}

fn default_page_concurrency() -> usize {
    2
}

fn default_pdf_dpi() -> u32 {
    150
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            database_path: None,
            backend: BackendKind::default(),
            default_mode: OcrMode::default(),
            max_file_size_mb: default_max_file_size_mb(),
            max_queue_depth: None,
            job_timeout_secs: default_job_timeout_secs(),
            stale_claim_secs: default_stale_claim_secs(),
            page_concurrency: default_page_concurrency(),
            pdf_dpi: default_pdf_dpi(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            backends: BackendsConfig::default(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Config {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn stale_claim_after(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }

    /// Configured database path, falling back to the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per backend call, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_idle_backoff_min_ms")]
    pub idle_backoff_min_ms: u64,
    #[serde(default = "default_idle_backoff_max_ms")]
    pub idle_backoff_max_ms: u64,
    /// How often the pool sweeps for abandoned claims.
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
}

fn default_idle_backoff_min_ms() -> u64 {
    250
}

fn default_idle_backoff_max_ms() -> u64 {
    2_000
}

fn default_recovery_interval_secs() -> u64 {
    60
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            idle_backoff_min_ms: default_idle_backoff_min_ms(),
            idle_backoff_max_ms: default_idle_backoff_max_ms(),
            recovery_interval_secs: default_recovery_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub huggingface: HostedBackendConfig,
    #[serde(default)]
    pub deepseek: HostedBackendConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// An HTTP inference endpoint with optional bearer token.
///
/// The token may be given directly, read from a file, or read from a named
/// environment variable (first one set wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedBackendConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for HostedBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            token_file: None,
            token_env: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_ollama_model() -> String {
    "glm-ocr".to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_ollama_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
