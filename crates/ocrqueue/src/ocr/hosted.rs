//! Hosted inference endpoints (HuggingFace GLM-OCR, DeepSeek-OCR).

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::error::BackendError;
use crate::job::{BackendKind, OcrMode};
use crate::ocr::transient::{from_reqwest, from_status};
use crate::ocr::{glm_prompt, OcrBackend, DEEPSEEK_PROMPT};

/// `\(` or `\)` directly before an amount.
static RE_DOLLAR_BEFORE_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[()]([\d,.])").unwrap());
/// `\)` closing a cell, right before an HTML tag.
static RE_DOLLAR_BEFORE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\\)(\s*<)").unwrap());

/// Client for an HTTP inference endpoint that accepts a base64 page image and
/// a task prompt and answers with JSON containing the generated markdown.
pub struct HostedBackend {
    kind: BackendKind,
    client: Client,
    endpoint: String,
    token: Option<SecretString>,
}

impl HostedBackend {
    pub fn new(
        kind: BackendKind,
        endpoint: &str,
        token: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            kind,
            client,
            endpoint: endpoint.to_string(),
            token,
        })
    }

    fn prompt(&self, mode: OcrMode) -> &'static str {
        match self.kind {
            BackendKind::DeepSeek => DEEPSEEK_PROMPT,
            _ => glm_prompt(mode),
        }
    }

    fn request_body(&self, image: &[u8], mode: OcrMode) -> Value {
        json!({
            "inputs": {
                "image": STANDARD.encode(image),
                "prompt": self.prompt(mode),
            }
        })
    }
}

#[async_trait]
impl OcrBackend for HostedBackend {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn supports_single_pass_auto(&self) -> bool {
        self.kind == BackendKind::DeepSeek
    }

    async fn recognize(&self, image: &[u8], mode: OcrMode) -> Result<String, BackendError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(image, mode));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| from_reqwest(self.name(), e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest(self.name(), e))?;
        if !status.is_success() {
            return Err(from_status(self.name(), status, &body));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            BackendError::permanent(self.name(), format!("response is not JSON: {}", e))
        })?;
        let text = extract_text(&value).ok_or_else(|| {
            BackendError::permanent(self.name(), "unexpected response format: no text field")
        })?;

        tracing::debug!(backend = self.name(), chars = text.len(), "Page recognized");
        Ok(match self.kind {
            BackendKind::DeepSeek => fix_latex_dollars(&text),
            _ => text,
        })
    }
}

/// Pulls the generated text out of the usual inference response shapes:
/// a bare string, an object with a text field, or a list of either.
fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["text", "generated_text", "markdown", "response"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        Value::Array(items) => items.first().and_then(extract_text),
        _ => None,
    }
}

/// DeepSeek reads `$45.2M` as inline LaTeX and emits `\(45.2M`. Puts the
/// currency signs back while leaving real math such as `\(x^2\)` alone.
pub(crate) fn fix_latex_dollars(text: &str) -> String {
    let text = RE_DOLLAR_BEFORE_AMOUNT.replace_all(text, "$$${1}");
    RE_DOLLAR_BEFORE_TAG.replace_all(&text, "$$${1}").into_owned()
}
