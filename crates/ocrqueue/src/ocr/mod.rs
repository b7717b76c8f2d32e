//! OCR backends and the dispatcher that drives them.
//!
//! Every backend is one capability: page image in, markdown out. The
//! [`Dispatcher`] adds the recognition modes on top, including the two-pass
//! AUTO merge for backends that have no unified output.

pub mod dispatcher;
pub mod hosted;
pub mod merge;
pub mod ollama;
pub mod transient;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::schema::BackendsConfig;
use crate::error::{BackendError, ConfigError};
use crate::job::{BackendKind, OcrMode};
use crate::secrets::resolve_secret;

pub use dispatcher::{Dispatcher, RecognizedText};
pub use hosted::HostedBackend;
pub use merge::{MergeStrategy, TableSplice};
pub use ollama::OllamaBackend;

/// A single OCR inference capability.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Whether one `OcrMode::Auto` call already yields text and tables
    /// together. When `false` the dispatcher runs a text and a table pass.
    fn supports_single_pass_auto(&self) -> bool {
        false
    }

    /// Recognizes one PNG page. Must not retry internally.
    async fn recognize(&self, image: &[u8], mode: OcrMode) -> Result<String, BackendError>;
}

/// GLM-OCR task prompts.
pub(crate) fn glm_prompt(mode: OcrMode) -> &'static str {
    match mode {
        OcrMode::Table => "Table Recognition:",
        OcrMode::Text | OcrMode::Auto => "Text Recognition:",
    }
}

/// DeepSeek-OCR emits markdown with inline HTML tables from a single prompt.
pub(crate) const DEEPSEEK_PROMPT: &str = "<image>\n<|grounding|>Convert the document to markdown.";

/// Backends available to workers, keyed by the identifier stored on jobs.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn OcrBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: BackendKind, backend: Arc<dyn OcrBackend>) {
        self.backends.insert(kind, backend);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn OcrBackend>> {
        self.backends.get(&kind).cloned()
    }

    /// Registered identifiers, sorted by name.
    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<BackendKind> = self.backends.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Builds every backend that has an endpoint configured. Jobs that name
    /// an unconfigured backend fail at processing time.
    pub fn from_config(config: &BackendsConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        for (kind, hosted) in [
            (BackendKind::HuggingFace, &config.huggingface),
            (BackendKind::DeepSeek, &config.deepseek),
        ] {
            let Some(endpoint) = hosted.endpoint.as_deref().filter(|e| !e.is_empty()) else {
                continue;
            };
            let token = resolve_secret(
                hosted.token.as_deref(),
                hosted.token_file.as_deref(),
                hosted.token_env.as_deref(),
            )?;
            let backend = HostedBackend::new(
                kind,
                endpoint,
                token,
                Duration::from_secs(hosted.request_timeout_secs),
            )
            .map_err(|e| http_client_error(kind, e))?;
            registry.register(kind, Arc::new(backend));
        }

        if let Some(url) = config.ollama.url.as_deref().filter(|u| !u.is_empty()) {
            let backend = OllamaBackend::new(
                url,
                &config.ollama.model,
                Duration::from_secs(config.ollama.request_timeout_secs),
            )
            .map_err(|e| http_client_error(BackendKind::Ollama, e))?;
            registry.register(BackendKind::Ollama, Arc::new(backend));
        }

        log::info!(
            "OCR backends configured: [{}]",
            registry
                .kinds()
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(registry)
    }
}

fn http_client_error(kind: BackendKind, err: reqwest::Error) -> ConfigError {
    ConfigError::Validation {
        message: format!("Failed to build HTTP client for {} backend: {}", kind, err),
    }
}
