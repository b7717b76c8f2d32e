use std::sync::Arc;

use crate::error::BackendError;
use crate::job::OcrMode;
use crate::ocr::{MergeStrategy, OcrBackend};

/// Output of one page recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedText {
    pub text: String,
    pub mode_used: OcrMode,
}

/// Turns a page image plus mode into markdown using one backend.
///
/// Never retries: a failed call is returned as is and the caller decides.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn OcrBackend>,
    merge: Arc<dyn MergeStrategy>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn OcrBackend>, merge: Arc<dyn MergeStrategy>) -> Self {
        Self { backend, merge }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn recognize(
        &self,
        image: &[u8],
        mode: OcrMode,
    ) -> Result<RecognizedText, BackendError> {
        let text = match mode {
            OcrMode::Text | OcrMode::Table => self.backend.recognize(image, mode).await?,
            OcrMode::Auto if self.backend.supports_single_pass_auto() => {
                self.backend.recognize(image, OcrMode::Auto).await?
            }
            OcrMode::Auto => {
                let text_pass = self.backend.recognize(image, OcrMode::Text).await?;
                let table_pass = self.backend.recognize(image, OcrMode::Table).await?;
                tracing::trace!(strategy = self.merge.name(), "Merging AUTO passes");
                self.merge.merge(&text_pass, &table_pass)
            }
        };

        Ok(RecognizedText {
            text,
            mode_used: mode,
        })
    }
}
