// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted work queue for analysis jobs.

use async_trait::async_trait;

use crate::error::FinsightError;
use crate::traits::storage::StorageAdapter;
use crate::types::{AnalysisJob, NewAnalysisJob, ProgressLogEntry, QueueStats};

/// Claim-with-lease job queue.
///
/// Jobs move `pending -> claimed -> {completed | failed}`; a retried failure
/// goes back to `pending` until the attempt ceiling is reached. A claimed job
/// whose lease lapses is reclaimable, so a crashed worker never strands work.
#[async_trait]
pub trait JobQueue: StorageAdapter {
    /// Persists a new `pending` job and returns its generated id.
    async fn enqueue_analysis(&self, job: NewAnalysisJob) -> Result<String, FinsightError>;

    /// Atomically claims the oldest available job for `worker_id`, or `None`
    /// when nothing is claimable. At most one worker can claim a given job.
    async fn dequeue_analysis(&self, worker_id: &str)
    -> Result<Option<AnalysisJob>, FinsightError>;

    /// `claimed -> completed`, storing `result`. `false` if the job is not
    /// claimed by `worker_id`.
    async fn ack_analysis(
        &self,
        job_id: &str,
        worker_id: &str,
        result: serde_json::Value,
    ) -> Result<bool, FinsightError>;

    /// `claimed -> failed`, or back to `pending` when `retry` is set and the
    /// attempt ceiling allows it. `false` if the job is not claimed by
    /// `worker_id`.
    async fn nack_analysis(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<bool, FinsightError>;

    /// Pushes the lease of a job `worker_id` still holds one full lease
    /// into the future. `false` once the job was reclaimed or finished.
    async fn renew_lease(&self, job_id: &str, worker_id: &str) -> Result<bool, FinsightError>;

    /// Counts of jobs by status.
    async fn get_queue_stats(&self) -> Result<QueueStats, FinsightError>;

    /// Fetches one job by id.
    async fn get_job(&self, job_id: &str) -> Result<Option<AnalysisJob>, FinsightError>;

    /// Appends a durable progress entry to the job's log. `false` if the job
    /// does not exist.
    async fn append_job_log(
        &self,
        job_id: &str,
        entry: &ProgressLogEntry,
    ) -> Result<bool, FinsightError>;

    /// Returns expired leases to `pending` (or `failed` at the attempt
    /// ceiling). Returns the number of jobs touched.
    async fn reclaim_expired_leases(&self) -> Result<u64, FinsightError>;
}
