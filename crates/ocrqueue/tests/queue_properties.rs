//! Queue-level guarantees of the job store and service: exclusive claims,
//! FIFO order, crash recovery and submission limits, including under
//! concurrent submitters.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use ocrqueue::db::Database;
use ocrqueue::{JobState, JobStore, NewJob, OcrMode, PageResult, ServiceError, SourceKind};

use common::*;

fn new_job(n: usize) -> NewJob {
    NewJob {
        source_kind: SourceKind::Pdf,
        mode: OcrMode::Text,
        backend: ocrqueue::BackendKind::Ollama,
        filename: Some(format!("doc-{}.pdf", n)),
        payload: FAKE_PDF.to_vec(),
    }
}

fn file_store(dir: &TempDir) -> JobStore {
    JobStore::new(Database::open(&dir.path().join("jobs.db")).unwrap())
}

#[test]
fn test_no_double_claim_across_threads() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let total = 60;
    for n in 0..total {
        store.insert(new_job(n)).unwrap();
    }

    let claimed = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..8)
        .map(|w| {
            let store = store.clone();
            let claimed = Arc::clone(&claimed);
            thread::spawn(move || {
                let worker = format!("worker-{}", w);
                while let Some(claim) = store.claim_next(&worker).unwrap() {
                    let page = PageResult {
                        page_index: 0,
                        text: claim.job.id.clone(),
                        mode_used: OcrMode::Text,
                    };
                    assert!(store.complete(&claim, &[page], 0).unwrap());
                    claimed.lock().unwrap().push(claim.job.id);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let claimed = claimed.lock().unwrap();
    let unique: HashSet<_> = claimed.iter().collect();
    assert_eq!(claimed.len(), total);
    assert_eq!(unique.len(), total);
    assert_eq!(store.count_by_state(JobState::Completed).unwrap(), total as u64);
    assert_eq!(store.count_by_state(JobState::Queued).unwrap(), 0);
}

#[test]
fn test_queue_limit_holds_under_concurrent_submitters() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");
    drop(file_store(&dir));
    let limit = 5;

    let results = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            let results = Arc::clone(&results);
            thread::spawn(move || {
                // A separate connection per thread, like separate processes.
                let store = JobStore::new(Database::open(&path).unwrap());
                let mut settings = submit_settings();
                settings.max_queue_depth = Some(limit);
                let service = ocrqueue::JobService::new(store, settings);
                for _ in 0..10 {
                    let result = service.submit(FAKE_PDF.to_vec(), SourceKind::Pdf, None);
                    results.lock().unwrap().push(result);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let results = results.lock().unwrap();
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, limit as usize);
    for rejected in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(rejected, ServiceError::QueueFull { depth: 5, limit: 5 }),
            "{:?}",
            rejected
        );
    }
    assert_eq!(file_store(&dir).count_by_state(JobState::Queued).unwrap(), limit);
}

#[test]
fn test_fifo_claim_order() {
    let store = JobStore::in_memory().unwrap();
    let ids: Vec<_> = (0..5).map(|n| store.insert(new_job(n)).unwrap()).collect();

    let claimed: Vec<_> = std::iter::from_fn(|| store.claim_next("w").unwrap())
        .map(|claim| claim.job.id)
        .collect();
    assert_eq!(claimed, ids);
}

#[test]
fn test_claim_on_empty_queue_returns_none() {
    let store = JobStore::in_memory().unwrap();
    assert!(store.claim_next("w").unwrap().is_none());
}

#[test]
fn test_stale_claim_recovered_and_old_owner_locked_out() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let id = store.insert(new_job(0)).unwrap();
    let stale = store.claim_next("crashed-worker").unwrap().unwrap();

    thread::sleep(Duration::from_millis(20));
    assert_eq!(store.requeue_stale(chrono::Duration::milliseconds(5)).unwrap(), 1);

    let job = store.get(&id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Queued);
    assert!(job.started_at.is_none());
    assert!(job.claimed_by.is_none());

    let fresh = store.claim_next("new-worker").unwrap().unwrap();
    assert_eq!(fresh.job.id, id);

    // The crashed owner's late write-back is ignored.
    assert!(!store.complete(&stale, &[], 0).unwrap());
    assert!(store.complete(&fresh, &[], 0).unwrap());
    assert_eq!(store.get(&id).unwrap().unwrap().state, JobState::Completed);
}

#[test]
fn test_recent_claims_not_recovered() {
    let store = JobStore::in_memory().unwrap();
    store.insert(new_job(0)).unwrap();
    store.claim_next("w").unwrap().unwrap();

    assert_eq!(store.requeue_stale(chrono::Duration::minutes(10)).unwrap(), 0);
    assert_eq!(store.count_by_state(JobState::Processing).unwrap(), 1);
}

#[test]
fn test_pagination_45_jobs() {
    let harness = TestHarness::new(MockBackend::new(), MockDecoder::pages(1));
    for _ in 0..45 {
        harness.submit(OcrMode::Text);
    }

    let sizes: Vec<_> = (1..=3)
        .map(|page| harness.service.list(None, page, 20).unwrap())
        .map(|listing| {
            assert_eq!(listing.total, 45);
            listing.items.len()
        })
        .collect();
    assert_eq!(sizes, vec![20, 20, 5]);

    let beyond = harness.service.list(None, 4, 20).unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 45);
}

#[test]
fn test_listing_is_newest_first() {
    let harness = TestHarness::new(MockBackend::new(), MockDecoder::pages(1));
    let first = harness.submit(OcrMode::Text);
    let last = harness.submit(OcrMode::Text);

    let listing = harness.service.list(None, 1, 10).unwrap();
    assert_eq!(listing.items[0].id, last);
    assert_eq!(listing.items[1].id, first);
}

#[test]
fn test_size_rejection_creates_no_record() {
    let harness = TestHarness::new(MockBackend::new(), MockDecoder::pages(1));
    let mut oversized = FAKE_PDF.to_vec();
    oversized.resize(2 * 1024 * 1024, b'0');

    let err = harness
        .service
        .submit(oversized, SourceKind::Pdf, None)
        .unwrap_err();
    assert!(matches!(err, ServiceError::SizeExceeded { .. }));
    assert_eq!(harness.service.list(None, 1, 10).unwrap().total, 0);
    assert_eq!(harness.service.queue_depth().unwrap(), 0);
}

#[test]
fn test_backend_fixed_at_submission() {
    let harness = TestHarness::new(MockBackend::new(), MockDecoder::pages(1));
    let id = harness.submit(OcrMode::Text);

    // A service built later with another backend does not touch queued jobs.
    let mut settings = submit_settings();
    settings.backend = ocrqueue::BackendKind::DeepSeek;
    let other = ocrqueue::JobService::new(harness.store.clone(), settings);
    let later = other.submit(FAKE_PDF.to_vec(), SourceKind::Pdf, None).unwrap();

    assert_eq!(harness.job(&id).unwrap().backend, ocrqueue::BackendKind::Ollama);
    assert_eq!(harness.job(&later).unwrap().backend, ocrqueue::BackendKind::DeepSeek);
}
