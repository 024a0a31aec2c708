// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The poll / claim / execute / ack loop.

use std::sync::Arc;
use std::time::Duration;

use finsight_bus::ProgressBroadcaster;
use finsight_core::{AnalysisJob, FinsightError, JobQueue, SessionLockStore};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::executor::{AnalysisExecutor, ExecutionError};
use crate::reporter::ProgressReporter;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_LOCK_EXTENSION: Duration = Duration::from_secs(300);
const DEFAULT_LEASE_RENEWAL: Duration = Duration::from_secs(100);

/// How one claimed job ended for this worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Acked with a result.
    Completed { job_id: String },
    /// Nacked and requeued for another attempt.
    Retrying { job_id: String, error: String },
    /// Nacked with no attempts left, or with a permanent error.
    Failed { job_id: String, error: String },
    /// The job stopped being claimed by this worker, typically after the
    /// lease expired and another worker reclaimed it. Execution is abandoned
    /// without an ack or nack.
    LeaseLost { job_id: String },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            JobOutcome::Completed { job_id }
            | JobOutcome::Retrying { job_id, .. }
            | JobOutcome::Failed { job_id, .. }
            | JobOutcome::LeaseLost { job_id } => job_id,
        }
    }

    /// Whether the job reached `completed` or `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. } | JobOutcome::Failed { .. })
    }
}

/// A single queue consumer.
///
/// Cheap to run many of: each holds only `Arc` handles to shared services.
pub struct AnalysisWorker {
    worker_id: String,
    queue: Arc<dyn JobQueue>,
    locks: Arc<dyn SessionLockStore>,
    broadcaster: ProgressBroadcaster,
    executor: Arc<dyn AnalysisExecutor>,
    poll_interval: Duration,
    lock_extension: Duration,
    lease_renewal: Duration,
}

impl AnalysisWorker {
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        locks: Arc<dyn SessionLockStore>,
        broadcaster: ProgressBroadcaster,
        executor: Arc<dyn AnalysisExecutor>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            locks,
            broadcaster,
            executor,
            poll_interval: DEFAULT_POLL_INTERVAL,
            lock_extension: DEFAULT_LOCK_EXTENSION,
            lease_renewal: DEFAULT_LEASE_RENEWAL,
        }
    }

    /// Delay between polls while the queue is empty.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How far the session lock is pushed out when a job is claimed.
    pub fn with_lock_extension(mut self, lock_extension: Duration) -> Self {
        self.lock_extension = lock_extension;
        self
    }

    /// How often the job lease and session lock are renewed while the
    /// executor runs. Should be well under the queue lease.
    pub fn with_lease_renewal(mut self, lease_renewal: Duration) -> Self {
        self.lease_renewal = lease_renewal.max(Duration::from_millis(1));
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Poll until `cancel` fires. A job in flight is finished before returning.
    ///
    /// Store failures are logged and retried on the next poll.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            worker_id = %self.worker_id,
            executor = self.executor.name(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "analysis worker started"
        );

        while !cancel.is_cancelled() {
            match self.run_once().await {
                // Keep draining while there is work.
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker_id = %self.worker_id, error = %e, "worker poll failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(worker_id = %self.worker_id, "analysis worker stopped");
    }

    /// Claim and process at most one job. `None` when the queue had nothing
    /// claimable.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, FinsightError> {
        let Some(job) = self.queue.dequeue_analysis(&self.worker_id).await? else {
            return Ok(None);
        };
        self.process(job).await.map(Some)
    }

    async fn process(&self, job: AnalysisJob) -> Result<JobOutcome, FinsightError> {
        info!(
            worker_id = %self.worker_id,
            job_id = %job.job_id,
            session_id = %job.session_id,
            attempt = job.attempt_count,
            "analysis job claimed"
        );

        let reporter = ProgressReporter::new(
            &job.job_id,
            &job.session_id,
            self.broadcaster.clone(),
            Arc::clone(&self.queue),
        );

        // The claim stands on the job lease; a lock we cannot extend is
        // still enforced by its remaining ttl.
        match self
            .locks
            .extend_lock_held_by(&job.session_id, &job.message_id, self.lock_extension)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                job_id = %job.job_id,
                session_id = %job.session_id,
                "session lock not held for this job's message"
            ),
            Err(e) => warn!(
                job_id = %job.job_id,
                session_id = %job.session_id,
                error = %e,
                "session lock extension failed"
            ),
        }

        reporter.info("analysis started").await;

        let outcome = match self.execute_with_renewal(&job, &reporter).await {
            None => JobOutcome::LeaseLost {
                job_id: job.job_id.clone(),
            },
            Some(Ok(result)) => {
                if self
                    .queue
                    .ack_analysis(&job.job_id, &self.worker_id, result)
                    .await?
                {
                    reporter.success("analysis completed").await;
                    JobOutcome::Completed {
                        job_id: job.job_id.clone(),
                    }
                } else {
                    JobOutcome::LeaseLost {
                        job_id: job.job_id.clone(),
                    }
                }
            }
            Some(Err(err)) => {
                let retry = err.is_retryable();
                let message = err.to_string();
                if !self
                    .queue
                    .nack_analysis(&job.job_id, &self.worker_id, &message, retry)
                    .await?
                {
                    JobOutcome::LeaseLost {
                        job_id: job.job_id.clone(),
                    }
                } else if retry && job.attempt_count < job.max_attempts {
                    reporter
                        .warning(format!(
                            "attempt {} of {} failed, retrying: {message}",
                            job.attempt_count, job.max_attempts
                        ))
                        .await;
                    JobOutcome::Retrying {
                        job_id: job.job_id.clone(),
                        error: message,
                    }
                } else {
                    reporter.error(format!("analysis failed: {message}")).await;
                    JobOutcome::Failed {
                        job_id: job.job_id.clone(),
                        error: message,
                    }
                }
            }
        };

        match &outcome {
            JobOutcome::LeaseLost { job_id } => {
                warn!(job_id = %job_id, worker_id = %self.worker_id, "job no longer claimed by this worker");
            }
            JobOutcome::Retrying { job_id, error } => {
                warn!(job_id = %job_id, error = %error, "analysis job requeued");
            }
            JobOutcome::Completed { .. } | JobOutcome::Failed { .. } => {
                self.finish_session(&job).await?;
                info!(job_id = %job.job_id, outcome = ?outcome, "analysis job finished");
            }
        }

        Ok(outcome)
    }

    /// Run the executor, renewing the job lease every `lease_renewal`.
    ///
    /// `None` when a renewal finds the job no longer claimed by this worker;
    /// the execution future is dropped at that point so a reclaimed job never
    /// runs to completion twice.
    async fn execute_with_renewal(
        &self,
        job: &AnalysisJob,
        reporter: &ProgressReporter,
    ) -> Option<Result<serde_json::Value, ExecutionError>> {
        let execution = self.executor.execute(job, reporter);
        tokio::pin!(execution);

        let mut renewal =
            tokio::time::interval_at(Instant::now() + self.lease_renewal, self.lease_renewal);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut execution => return Some(result),
                _ = renewal.tick() => {
                    if !self.renew(job).await {
                        return None;
                    }
                }
            }
        }
    }

    /// One renewal tick. Returns `false` only when the store says the job is
    /// no longer ours; store errors are logged and the job keeps running.
    async fn renew(&self, job: &AnalysisJob) -> bool {
        match self.queue.renew_lease(&job.job_id, &self.worker_id).await {
            Ok(true) => debug!(job_id = %job.job_id, "job lease renewed"),
            Ok(false) => return false,
            Err(e) => warn!(job_id = %job.job_id, error = %e, "job lease renewal failed"),
        }

        // Extending by the renewal period keeps the lock a constant distance
        // ahead instead of growing on every tick.
        if let Err(e) = self
            .locks
            .extend_lock_held_by(&job.session_id, &job.message_id, self.lease_renewal)
            .await
        {
            warn!(
                job_id = %job.job_id,
                session_id = %job.session_id,
                error = %e,
                "session lock renewal failed"
            );
        }
        true
    }

    /// Release the session for the next request once the job is terminal.
    async fn finish_session(&self, job: &AnalysisJob) -> Result<(), FinsightError> {
        let released = self
            .locks
            .release_lock_held_by(&job.session_id, &job.message_id)
            .await?;
        debug!(session_id = %job.session_id, released, "session lock released");

        if self.broadcaster.subscriber_count(&job.session_id) == 0 {
            self.broadcaster.clear(&job.session_id);
        }
        Ok(())
    }
}
