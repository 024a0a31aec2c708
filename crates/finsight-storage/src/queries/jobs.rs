// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Analysis job queue operations.
//!
//! Claims run inside `BEGIN IMMEDIATE` so the select-then-update pair holds
//! SQLite's write lock across processes, and the update itself is still
//! conditional on `status = 'pending'`.

use std::time::Duration;

use chrono::Utc;
use finsight_core::time::{add_duration, format_timestamp, now_timestamp};
use finsight_core::{
    AnalysisJob, FinsightError, JobStatus, NewAnalysisJob, ProgressLogEntry, QueueStats,
};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::database::{map_tr_err, Database};

/// Error recorded on a job whose worker stopped renewing its lease.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired";

/// Error recorded when an expired lease was the job's last allowed attempt.
pub const LEASE_EXHAUSTED_ERROR: &str = "lease expired after final attempt";

const JOB_COLUMNS: &str = "job_id, session_id, message_id, payload, status, worker_id,
     claimed_at, lease_expires_at, attempt_count, max_attempts, result, error,
     progress_log, created_at, updated_at";

/// Queue tuning applied to claims and retries.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    /// How long a claim protects a job from other workers.
    pub lease: Duration,
    /// Claims allowed before a failure is terminal.
    pub max_attempts: u32,
    /// Delay per attempt before a retried job is claimable again.
    pub retry_backoff: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            max_attempts: 3,
            retry_backoff: Duration::ZERO,
        }
    }
}

/// Persist a new pending job. Returns its generated id.
pub async fn enqueue(
    db: &Database,
    job: NewAnalysisJob,
    max_attempts: u32,
) -> Result<String, FinsightError> {
    let job_id = uuid::Uuid::new_v4().to_string();
    let payload = serde_json::to_string(&job.payload).map_err(FinsightError::storage)?;
    let now = now_timestamp();

    let id = job_id.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO analysis_jobs
                     (job_id, session_id, message_id, payload, status, attempt_count,
                      max_attempts, available_at, progress_log, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, '[]', ?6, ?6)",
                params![id, job.session_id, job.message_id, payload, max_attempts, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

    debug!(job_id = %job_id, "analysis job enqueued");
    Ok(job_id)
}

/// Claim the oldest claimable job for `worker_id`.
///
/// Expired leases are reclaimed first inside the same transaction, so a job
/// stranded by a dead worker is picked up by the next poll.
pub async fn dequeue(
    db: &Database,
    worker_id: &str,
    policy: QueuePolicy,
) -> Result<Option<AnalysisJob>, FinsightError> {
    let worker_id = worker_id.to_string();
    let now = Utc::now();
    let now_str = format_timestamp(now);
    let lease_expires_at = format_timestamp(add_duration(now, policy.lease));

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            reclaim_in_tx(&tx, &now_str)?;

            let next: Option<String> = tx
                .query_row(
                    "SELECT job_id FROM analysis_jobs
                     WHERE status = 'pending' AND available_at <= ?1
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT 1",
                    params![now_str],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(job_id) = next else {
                tx.commit()?;
                return Ok(None);
            };

            let claimed = tx.execute(
                "UPDATE analysis_jobs SET status = 'claimed', worker_id = ?1,
                     claimed_at = ?2, lease_expires_at = ?3,
                     attempt_count = attempt_count + 1, updated_at = ?2
                 WHERE job_id = ?4 AND status = 'pending'",
                params![worker_id, now_str, lease_expires_at, job_id],
            )?;
            if claimed != 1 {
                tx.commit()?;
                return Ok(None);
            }

            let job = select_job(&tx, &job_id)?;
            tx.commit()?;
            Ok(job)
        })
        .await
        .map_err(map_tr_err)
}

/// `claimed -> completed`. Returns `false` if the job is not claimed by
/// `worker_id`.
pub async fn ack(
    db: &Database,
    job_id: &str,
    worker_id: &str,
    result: &serde_json::Value,
) -> Result<bool, FinsightError> {
    let job_id = job_id.to_string();
    let worker_id = worker_id.to_string();
    let result = serde_json::to_string(result).map_err(FinsightError::storage)?;
    let now = now_timestamp();

    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE analysis_jobs SET status = 'completed', result = ?1,
                     lease_expires_at = NULL, updated_at = ?2
                 WHERE job_id = ?3 AND status = 'claimed' AND worker_id = ?4",
                params![result, now, job_id, worker_id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// `claimed -> failed`, or `claimed -> pending` when `retry` is set and the
/// job has attempts left. Returns `false` if the job is not claimed by
/// `worker_id`.
pub async fn nack(
    db: &Database,
    job_id: &str,
    worker_id: &str,
    error: &str,
    retry: bool,
    policy: QueuePolicy,
) -> Result<bool, FinsightError> {
    let job_id = job_id.to_string();
    let worker_id = worker_id.to_string();
    let error = error.to_string();
    let now = Utc::now();
    let now_str = format_timestamp(now);

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let attempts: Option<(u32, u32)> = tx
                .query_row(
                    "SELECT attempt_count, max_attempts FROM analysis_jobs
                     WHERE job_id = ?1 AND status = 'claimed' AND worker_id = ?2",
                    params![job_id, worker_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((attempt_count, max_attempts)) = attempts else {
                return Ok(false);
            };

            if retry && attempt_count < max_attempts {
                let delay = policy.retry_backoff.saturating_mul(attempt_count);
                let available_at = format_timestamp(add_duration(now, delay));
                tx.execute(
                    "UPDATE analysis_jobs SET status = 'pending', error = ?1,
                         worker_id = NULL, claimed_at = NULL, lease_expires_at = NULL,
                         available_at = ?2, updated_at = ?3
                     WHERE job_id = ?4 AND status = 'claimed'",
                    params![error, available_at, now_str, job_id],
                )?;
            } else {
                tx.execute(
                    "UPDATE analysis_jobs SET status = 'failed', error = ?1,
                         lease_expires_at = NULL, updated_at = ?2
                     WHERE job_id = ?3 AND status = 'claimed'",
                    params![error, now_str, job_id],
                )?;
            }
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)
}

/// Pushes the lease of a job still claimed by `worker_id` to `now + lease`.
/// Returns `false` once the job was reclaimed, handed to another worker, or
/// finished.
pub async fn renew_lease(
    db: &Database,
    job_id: &str,
    worker_id: &str,
    lease: Duration,
) -> Result<bool, FinsightError> {
    let job_id = job_id.to_string();
    let worker_id = worker_id.to_string();
    let now = Utc::now();
    let now_str = format_timestamp(now);
    let lease_expires_at = format_timestamp(add_duration(now, lease));

    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE analysis_jobs SET lease_expires_at = ?1, updated_at = ?2
                 WHERE job_id = ?3 AND status = 'claimed' AND worker_id = ?4",
                params![lease_expires_at, now_str, job_id, worker_id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Counts of jobs by status.
pub async fn stats(db: &Database) -> Result<QueueStats, FinsightError> {
    let counts: Vec<(String, u64)> = db
        .connection()
        .call(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM analysis_jobs GROUP BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)?;

    let mut stats = QueueStats::default();
    for (status, count) in counts {
        match status.parse::<JobStatus>() {
            Ok(JobStatus::Pending) => stats.pending = count,
            Ok(JobStatus::Claimed) => stats.claimed = count,
            Ok(JobStatus::Completed) => stats.completed = count,
            Ok(JobStatus::Failed) => stats.failed = count,
            Err(_) => tracing::warn!(status = %status, "unknown job status in queue table"),
        }
    }
    Ok(stats)
}

/// Fetch a job by id.
pub async fn get(db: &Database, job_id: &str) -> Result<Option<AnalysisJob>, FinsightError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| select_job(conn, &job_id))
        .await
        .map_err(map_tr_err)
}

/// Jobs for one session, oldest first.
pub async fn list_for_session(
    db: &Database,
    session_id: &str,
) -> Result<Vec<AnalysisJob>, FinsightError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM analysis_jobs
                 WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![session_id], row_to_job)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Append one entry to the job's `progress_log` JSON array.
pub async fn append_log(
    db: &Database,
    job_id: &str,
    entry: &ProgressLogEntry,
) -> Result<bool, FinsightError> {
    let job_id = job_id.to_string();
    let entry = serde_json::to_string(entry).map_err(FinsightError::storage)?;

    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE analysis_jobs
                 SET progress_log = json_insert(progress_log, '$[#]', json(?1))
                 WHERE job_id = ?2",
                params![entry, job_id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Standalone lease sweep for the background reclaimer.
pub async fn reclaim_expired(db: &Database) -> Result<u64, FinsightError> {
    let now = now_timestamp();
    let touched = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let touched = reclaim_in_tx(&tx, &now)?;
            tx.commit()?;
            Ok(touched)
        })
        .await
        .map_err(map_tr_err)?;

    if touched > 0 {
        info!(count = touched, "reclaimed expired analysis job leases");
    }
    Ok(touched)
}

/// Return expired leases to `pending`, or to `failed` once the attempt
/// ceiling is reached.
fn reclaim_in_tx(tx: &Transaction<'_>, now: &str) -> Result<u64, rusqlite::Error> {
    let exhausted = tx.execute(
        "UPDATE analysis_jobs SET status = 'failed', error = ?1,
             lease_expires_at = NULL, updated_at = ?2
         WHERE status = 'claimed' AND lease_expires_at <= ?2
           AND attempt_count >= max_attempts",
        params![LEASE_EXHAUSTED_ERROR, now],
    )?;
    let requeued = tx.execute(
        "UPDATE analysis_jobs SET status = 'pending', error = ?1,
             worker_id = NULL, claimed_at = NULL, lease_expires_at = NULL,
             available_at = ?2, updated_at = ?2
         WHERE status = 'claimed' AND lease_expires_at <= ?2",
        params![LEASE_EXPIRED_ERROR, now],
    )?;
    Ok((exhausted + requeued) as u64)
}

fn select_job(
    conn: &rusqlite::Connection,
    job_id: &str,
) -> Result<Option<AnalysisJob>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE job_id = ?1"),
        params![job_id],
        row_to_job,
    )
    .optional()
}

fn row_to_job(row: &rusqlite::Row<'_>) -> Result<AnalysisJob, rusqlite::Error> {
    let status: String = row.get(4)?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let result: Option<String> = row.get(10)?;
    let result = result
        .map(|raw| parse_json(10, &raw))
        .transpose()?;

    Ok(AnalysisJob {
        job_id: row.get(0)?,
        session_id: row.get(1)?,
        message_id: row.get(2)?,
        payload: parse_json(3, &row.get::<_, String>(3)?)?,
        status,
        worker_id: row.get(5)?,
        claimed_at: row.get(6)?,
        lease_expires_at: row.get(7)?,
        attempt_count: row.get(8)?,
        max_attempts: row.get(9)?,
        result,
        error: row.get(11)?,
        progress_log: parse_json(12, &row.get::<_, String>(12)?)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn parse_json<T: DeserializeOwned>(idx: usize, raw: &str) -> Result<T, rusqlite::Error> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
