//! Typed job store over the SQLite job repository.
//!
//! All operations are synchronous and short. Async callers run them through
//! `tokio::task::spawn_blocking` (see [`crate::worker::blocking`]).

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::db::job_repo::{self, JobFilter, JobRow, Outcome};
use crate::db::{Database, DatabaseError};
use crate::job::{BackendKind, Job, JobFailure, JobState, OcrMode, PageResult, SourceKind};

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Fixed-width UTC timestamps so that string order equals time order.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str, job_id: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid(job_id, format!("bad timestamp '{}': {}", s, e)))
}

fn parse_opt_timestamp(
    s: Option<&str>,
    job_id: &str,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(|s| parse_timestamp(s, job_id)).transpose()
}

fn invalid(job_id: &str, reason: impl Into<String>) -> DatabaseError {
    DatabaseError::InvalidRow {
        id: job_id.to_string(),
        reason: reason.into(),
    }
}

fn job_from_row(row: JobRow) -> Result<Job, DatabaseError> {
    let id = row.id.as_str();
    let state: JobState = row.state.parse().map_err(|e: String| invalid(id, e))?;
    let source_kind: SourceKind = row.source_kind.parse().map_err(|e: String| invalid(id, e))?;
    let mode: OcrMode = row.mode.parse().map_err(|e: String| invalid(id, e))?;
    let backend: BackendKind = row.backend.parse().map_err(|e: String| invalid(id, e))?;

    let result = row
        .result
        .as_deref()
        .map(serde_json::from_str::<Vec<PageResult>>)
        .transpose()
        .map_err(|e| invalid(id, format!("bad result JSON: {}", e)))?;
    let error = row
        .error
        .as_deref()
        .map(serde_json::from_str::<JobFailure>)
        .transpose()
        .map_err(|e| invalid(id, format!("bad error JSON: {}", e)))?;

    Ok(Job {
        state,
        source_kind,
        mode,
        backend,
        created_at: parse_timestamp(&row.created_at, id)?,
        started_at: parse_opt_timestamp(row.started_at.as_deref(), id)?,
        completed_at: parse_opt_timestamp(row.completed_at.as_deref(), id)?,
        file_size: row.file_size.max(0) as u64,
        page_count: row.page_count.map(|n| n.max(0) as u32),
        result,
        error,
        retry_count: row.retry_count.max(0) as u32,
        filename: row.filename,
        claimed_by: row.claimed_by,
        id: row.id,
    })
}

// ─── Inputs ─────────────────────────────────────────────────────────────────

/// A validated submission ready to be queued.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source_kind: SourceKind,
    pub mode: OcrMode,
    pub backend: BackendKind,
    pub filename: Option<String>,
    pub payload: Vec<u8>,
}

/// Result of a bounded insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Queued(String),
    /// The queue already held `depth` of at most `limit` jobs; nothing was
    /// stored.
    Full { depth: u64, limit: u64 },
}

/// Proof of ownership for a claimed job. Write-backs must present it.
#[derive(Debug, Clone)]
pub struct Claim {
    pub job: Job,
    pub token: String,
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Persistent job queue backed by rusqlite.
///
/// Cloning is cheap: the underlying [`Database`] is `Arc`-based.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens a store backed by a fresh in-memory database.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.db.path()
    }

    /// Queues a new job and returns its id.
    pub fn insert(&self, new_job: NewJob) -> Result<String, DatabaseError> {
        self.insert_at(new_job, Utc::now())
    }

    pub(crate) fn insert_at(
        &self,
        new_job: NewJob,
        created_at: DateTime<Utc>,
    ) -> Result<String, DatabaseError> {
        let row = queued_row(&new_job, created_at);
        job_repo::insert(&self.db, &row, &new_job.payload)?;
        log::debug!("Queued job {} ({} bytes)", row.id, row.file_size);
        Ok(row.id)
    }

    /// Queues a new job unless `max_queued` jobs are already waiting. The
    /// depth check and the insert are atomic.
    pub fn insert_bounded(
        &self,
        new_job: NewJob,
        max_queued: Option<u64>,
    ) -> Result<Admission, DatabaseError> {
        let Some(limit) = max_queued else {
            return self.insert(new_job).map(Admission::Queued);
        };
        let row = queued_row(&new_job, Utc::now());
        if let Some(depth) = job_repo::insert_bounded(&self.db, &row, &new_job.payload, limit)? {
            return Ok(Admission::Full { depth, limit });
        }
        log::debug!("Queued job {} ({} bytes)", row.id, row.file_size);
        Ok(Admission::Queued(row.id))
    }

    /// Claims the oldest queued job for `worker_id`. Never blocks on an empty
    /// queue.
    pub fn claim_next(&self, worker_id: &str) -> Result<Option<Claim>, DatabaseError> {
        let token = Uuid::new_v4().to_string();
        let started_at = format_timestamp(Utc::now());
        match job_repo::claim_next(&self.db, &started_at, worker_id, &token)? {
            Some(row) => Ok(Some(Claim {
                job: job_from_row(row)?,
                token,
            })),
            None => Ok(None),
        }
    }

    /// Records the assembled result. Returns `false` if the claim was lost.
    pub fn complete(
        &self,
        claim: &Claim,
        pages: &[PageResult],
        retry_count: u32,
    ) -> Result<bool, DatabaseError> {
        let result_json = serde_json::to_string(pages)?;
        let completed_at = format_timestamp(Utc::now());
        let outcome = Outcome {
            id: &claim.job.id,
            claim_token: &claim.token,
            completed_at: &completed_at,
            page_count: Some(pages.len() as i64),
            retry_count: i64::from(retry_count),
        };
        job_repo::complete(&self.db, &outcome, &result_json)
    }

    /// Records a terminal failure. Returns `false` if the claim was lost.
    pub fn fail(
        &self,
        claim: &Claim,
        failure: &JobFailure,
        page_count: Option<u32>,
        retry_count: u32,
    ) -> Result<bool, DatabaseError> {
        let error_json = serde_json::to_string(failure)?;
        let completed_at = format_timestamp(Utc::now());
        let outcome = Outcome {
            id: &claim.job.id,
            claim_token: &claim.token,
            completed_at: &completed_at,
            page_count: page_count.map(i64::from),
            retry_count: i64::from(retry_count),
        };
        job_repo::fail(&self.db, &outcome, &error_json)
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, id)?
            .map(job_from_row)
            .transpose()
    }

    /// Lists jobs newest first. `page` is 1-based; callers validate bounds.
    pub fn list(
        &self,
        state: Option<JobState>,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<Job>, u64), DatabaseError> {
        let filter = JobFilter {
            state: state.map(|s| s.as_str().to_string()),
            limit: Some(page_size),
            offset: Some(page.saturating_sub(1).saturating_mul(page_size)),
        };
        let (rows, total) = job_repo::query(&self.db, &filter)?;
        let jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }

    /// Removes a job and its payload. A worker still processing it will find
    /// its claim gone at write-back.
    pub fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        job_repo::delete(&self.db, id)
    }

    /// Re-queues `processing` jobs whose claim is older than `older_than`.
    /// Returns how many jobs were recovered. A cutoff before the start of the
    /// calendar recovers nothing.
    pub fn requeue_stale(&self, older_than: chrono::Duration) -> Result<usize, DatabaseError> {
        let Some(cutoff) = Utc::now().checked_sub_signed(older_than) else {
            return Ok(0);
        };
        let cutoff = format_timestamp(cutoff);
        let ids = job_repo::requeue_stale(&self.db, &cutoff)?;
        for id in &ids {
            log::warn!("Re-queued abandoned job {}", id);
        }
        Ok(ids.len())
    }

    pub fn count_by_state(&self, state: JobState) -> Result<u64, DatabaseError> {
        job_repo::count_by_state(&self.db, state.as_str())
    }

    pub fn load_payload(&self, id: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        job_repo::load_payload(&self.db, id)
    }
}

fn queued_row(new_job: &NewJob, created_at: DateTime<Utc>) -> JobRow {
    JobRow {
        id: Uuid::new_v4().to_string(),
        state: JobState::Queued.as_str().to_string(),
        source_kind: new_job.source_kind.as_str().to_string(),
        mode: new_job.mode.as_str().to_string(),
        backend: new_job.backend.as_str().to_string(),
        filename: new_job.filename.clone(),
        file_size: new_job.payload.len() as i64,
        created_at: format_timestamp(created_at),
        ..Default::default()
    }
}
