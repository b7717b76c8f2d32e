//! Scriptable collaborators for the worker pipeline.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ocrqueue::{BackendError, DecodeError, OcrBackend, OcrMode, PageDecoder, PageImage, SourceKind};

/// Page images produced by [`MockDecoder`] carry `page-{index}` as data, so
/// the backend can tell which page it was handed.
pub fn page_data(index: u32) -> Vec<u8> {
    format!("page-{}", index).into_bytes()
}

fn page_of(image: &[u8]) -> Option<u32> {
    std::str::from_utf8(image)
        .ok()?
        .strip_prefix("page-")?
        .parse()
        .ok()
}

/// OCR backend that echoes the page marker back as text.
///
/// Responses look like `page-2 (text)`. Delays, scripted failures and
/// permanently failing pages are configured up front.
#[derive(Default)]
pub struct MockBackend {
    calls: AtomicUsize,
    modes: Mutex<Vec<OcrMode>>,
    delays: HashMap<u32, Duration>,
    default_delay: Duration,
    script: Mutex<VecDeque<BackendError>>,
    failing_pages: HashMap<u32, BackendError>,
    single_pass: bool,
    panic_next: AtomicBool,
    outputs: Vec<(OcrMode, String)>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single_pass(mut self) -> Self {
        self.single_pass = true;
        self
    }

    pub fn with_delay(mut self, page: u32, delay: Duration) -> Self {
        self.delays.insert(page, delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// The next calls fail with these errors, in order, whatever the page.
    pub fn with_failures(self, errors: Vec<BackendError>) -> Self {
        *self.script.lock().unwrap() = errors.into();
        self
    }

    pub fn failing_page(mut self, page: u32, error: BackendError) -> Self {
        self.failing_pages.insert(page, error);
        self
    }

    /// Answers every call in `mode` with `text` instead of the page marker.
    pub fn with_output(mut self, mode: OcrMode, text: &str) -> Self {
        self.outputs.push((mode, text.to_string()));
        self
    }

    /// The first call panics instead of answering.
    pub fn panics_once(self) -> Self {
        self.panic_next.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn modes(&self) -> Vec<OcrMode> {
        self.modes.lock().unwrap().clone()
    }
}

pub fn transient(message: &str) -> BackendError {
    BackendError::transient("mock", message)
}

pub fn permanent(message: &str) -> BackendError {
    BackendError::permanent("mock", message)
}

#[async_trait]
impl OcrBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_single_pass_auto(&self) -> bool {
        self.single_pass
    }

    async fn recognize(&self, image: &[u8], mode: OcrMode) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("mock backend blew up");
        }

        let page = page_of(image);
        let delay = page
            .and_then(|p| self.delays.get(&p).copied())
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = page.and_then(|p| self.failing_pages.get(&p)) {
            return Err(err.clone());
        }
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }

        if let Some((_, text)) = self.outputs.iter().find(|(m, _)| *m == mode) {
            return Ok(text.clone());
        }
        Ok(format!("{} ({})", String::from_utf8_lossy(image), mode))
    }
}

/// Decoder that ignores the payload and yields a fixed number of pages.
pub struct MockDecoder {
    pages: u32,
    error: Option<DecodeError>,
    calls: AtomicUsize,
}

impl MockDecoder {
    pub fn pages(pages: u32) -> Self {
        Self {
            pages,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: DecodeError) -> Self {
        Self {
            pages: 0,
            error: Some(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PageDecoder for MockDecoder {
    fn decode(&self, _bytes: &[u8], _kind: SourceKind) -> Result<Vec<PageImage>, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        // Out of order on purpose; the pipeline sorts.
        Ok((0..self.pages)
            .rev()
            .map(|index| PageImage {
                index,
                data: page_data(index),
            })
            .collect())
    }
}
