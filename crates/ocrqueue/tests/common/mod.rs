//! Shared test utilities for ocrqueue integration tests.
//!
//! This module provides:
//! - `MockBackend` and `MockDecoder` standing in for OCR servers and poppler
//! - `TestHarness` wiring an in-memory store, the service and a worker pool

pub mod harness;
pub mod mocks;

pub use harness::*;
pub use mocks::*;
