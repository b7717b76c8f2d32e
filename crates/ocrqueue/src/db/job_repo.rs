//! Job repository: raw SQL for the `jobs` and `job_payloads` tables.
//!
//! Rows are exchanged as strings exactly as stored; typing happens one layer
//! up in [`crate::store`].

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, Default)]
pub struct JobRow {
    pub id: String,
    pub state: String,
    pub source_kind: String,
    pub mode: String,
    pub backend: String,
    pub filename: Option<String>,
    pub file_size: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub page_count: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: i64,
    pub claimed_by: Option<String>,
    pub claim_token: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            state: row.get("state")?,
            source_kind: row.get("source_kind")?,
            mode: row.get("mode")?,
            backend: row.get("backend")?,
            filename: row.get("filename")?,
            file_size: row.get("file_size")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            page_count: row.get("page_count")?,
            result: row.get("result")?,
            error: row.get("error")?,
            retry_count: row.get("retry_count")?,
            claimed_by: row.get("claimed_by")?,
            claim_token: row.get("claim_token")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub state: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Terminal write-back for a claimed job.
#[derive(Debug, Clone)]
pub struct Outcome<'a> {
    pub id: &'a str,
    pub claim_token: &'a str,
    pub completed_at: &'a str,
    pub page_count: Option<i64>,
    pub retry_count: i64,
}

/// Inserts a new job row together with its payload.
pub fn insert(db: &Database, job: &JobRow, payload: &[u8]) -> Result<(), DatabaseError> {
    insert_inner(db, job, payload, None).map(|_| ())
}

/// Inserts a new job only while fewer than `max_queued` jobs are queued.
///
/// The count and the insert are one statement, so concurrent submitters
/// cannot overshoot the limit. Returns the depth that blocked the insert, or
/// `None` when the job was stored.
pub fn insert_bounded(
    db: &Database,
    job: &JobRow,
    payload: &[u8],
    max_queued: u64,
) -> Result<Option<u64>, DatabaseError> {
    insert_inner(db, job, payload, Some(max_queued.min(i64::MAX as u64) as i64))
}

fn insert_inner(
    db: &Database,
    job: &JobRow,
    payload: &[u8],
    limit: Option<i64>,
) -> Result<Option<u64>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT INTO jobs (id, state, source_kind, mode, backend, filename, file_size,
             created_at, retry_count)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
             WHERE ?10 IS NULL OR (SELECT COUNT(*) FROM jobs WHERE state = 'queued') < ?10",
            params![
                job.id,
                job.state,
                job.source_kind,
                job.mode,
                job.backend,
                job.filename,
                job.file_size,
                job.created_at,
                job.retry_count,
                limit,
            ],
        )?;
        if inserted == 0 {
            let depth: i64 = tx.query_row(
                "SELECT COUNT(*) FROM jobs WHERE state = 'queued'",
                [],
                |row| row.get(0),
            )?;
            return Ok(Some(depth as u64));
        }
        tx.execute(
            "INSERT INTO job_payloads (job_id, data) VALUES (?1, ?2)",
            params![job.id, payload],
        )?;
        tx.commit()?;
        Ok(None)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_read_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Atomically moves the oldest queued job to `processing`.
///
/// Selection and update are one statement on the writer connection, so two
/// callers can never receive the same row.
pub fn claim_next(
    db: &Database,
    started_at: &str,
    worker_id: &str,
    claim_token: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE jobs SET state = 'processing', started_at = ?1, claimed_by = ?2,
                 claim_token = ?3
                 WHERE seq = (
                     SELECT seq FROM jobs WHERE state = 'queued'
                     ORDER BY created_at ASC, seq ASC LIMIT 1
                 )
                 RETURNING *",
                params![started_at, worker_id, claim_token],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Marks a claimed job completed. Returns `false` when the claim no longer
/// holds (job deleted, or recovered and claimed again).
pub fn complete(
    db: &Database,
    outcome: &Outcome<'_>,
    result_json: &str,
) -> Result<bool, DatabaseError> {
    finish(db, outcome, "completed", Some(result_json), None)
}

/// Marks a claimed job failed. Same ownership rule as [`complete`].
pub fn fail(db: &Database, outcome: &Outcome<'_>, error_json: &str) -> Result<bool, DatabaseError> {
    finish(db, outcome, "failed", None, Some(error_json))
}

fn finish(
    db: &Database,
    outcome: &Outcome<'_>,
    state: &str,
    result_json: Option<&str>,
    error_json: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET state = ?3, completed_at = ?4, page_count = ?5, result = ?6,
             error = ?7, retry_count = ?8, claim_token = NULL
             WHERE id = ?1 AND state = 'processing' AND claim_token = ?2",
            params![
                outcome.id,
                outcome.claim_token,
                state,
                outcome.completed_at,
                outcome.page_count,
                result_json,
                error_json,
                outcome.retry_count,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Puts `processing` jobs started before `cutoff` back into the queue.
/// Returns the ids that were re-queued.
pub fn requeue_stale(db: &Database, cutoff: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "UPDATE jobs SET state = 'queued', started_at = NULL, claimed_by = NULL,
             claim_token = NULL
             WHERE state = 'processing' AND (started_at IS NULL OR started_at < ?1)
             RETURNING id",
        )?;
        let ids = stmt
            .query_map(params![cutoff], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Queries jobs with filters, newest first, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_read_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref state) = filter.state {
            conditions.push(format!("state = ?{}", param_values.len() + 1));
            param_values.push(Box::new(state.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, seq DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs in the given state.
pub fn count_by_state(db: &Database, state: &str) -> Result<u64, DatabaseError> {
    db.with_read_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE state = ?1",
            params![state],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Deletes a job and its payload. Returns `false` if no such job existed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    })
}

/// Loads the submitted bytes of a job.
pub fn load_payload(db: &Database, id: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
    db.with_read_conn(|conn| {
        let data = conn
            .query_row(
                "SELECT data FROM job_payloads WHERE job_id = ?1",
                params![id],
                |r| r.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(data)
    })
}
