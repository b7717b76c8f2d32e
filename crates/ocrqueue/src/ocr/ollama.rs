//! GLM-OCR served by a local Ollama instance.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::job::OcrMode;
use crate::ocr::transient::{from_reqwest, from_status};
use crate::ocr::{glm_prompt, OcrBackend};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaBackend {
    client: Client,
    generate_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(url: &str, model: &str, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            generate_url: format!("{}/api/generate", url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl OcrBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn recognize(&self, image: &[u8], mode: OcrMode) -> Result<String, BackendError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: glm_prompt(mode),
            images: vec![STANDARD.encode(image)],
            stream: false,
        };

        let response = self
            .client
            .post(&self.generate_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| from_reqwest(self.name(), e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest(self.name(), e))?;
        if !status.is_success() {
            return Err(from_status(self.name(), status, &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            BackendError::permanent(
                self.name(),
                format!("unexpected response format: {}", e),
            )
        })?;
        Ok(parsed.response)
    }
}
