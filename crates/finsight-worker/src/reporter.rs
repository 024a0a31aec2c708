// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Progress reporting for a single running job.

use std::sync::Arc;

use finsight_bus::{ProgressBroadcaster, ProgressUpdate};
use finsight_core::{JobQueue, ProgressEvent, ProgressLogEntry};
use tracing::warn;

/// Sends each step to live subscribers and appends it to the job's
/// durable `progress_log`, so the history survives even when nobody was
/// watching.
///
/// Reporting is best-effort: a failed log append is logged and ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: String,
    session_id: String,
    broadcaster: ProgressBroadcaster,
    queue: Arc<dyn JobQueue>,
}

impl ProgressReporter {
    pub fn new(
        job_id: impl Into<String>,
        session_id: impl Into<String>,
        broadcaster: ProgressBroadcaster,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            session_id: session_id.into(),
            broadcaster,
            queue,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn report(&self, update: ProgressUpdate) -> ProgressEvent {
        let event = self.broadcaster.emit(&self.session_id, update).await;
        let entry = ProgressLogEntry::from(&event);
        match self.queue.append_job_log(&self.job_id, &entry).await {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %self.job_id, "progress log append found no job"),
            Err(e) => warn!(job_id = %self.job_id, error = %e, "progress log append failed"),
        }
        event
    }

    pub async fn info(&self, message: impl Into<String>) -> ProgressEvent {
        self.report(ProgressUpdate::info(message)).await
    }

    pub async fn success(&self, message: impl Into<String>) -> ProgressEvent {
        self.report(ProgressUpdate::success(message)).await
    }

    pub async fn warning(&self, message: impl Into<String>) -> ProgressEvent {
        self.report(ProgressUpdate::warning(message)).await
    }

    pub async fn error(&self, message: impl Into<String>) -> ProgressEvent {
        self.report(ProgressUpdate::error(message)).await
    }

    /// Report step `step` of `total_steps`.
    pub async fn step(&self, step: u32, total_steps: u32, message: impl Into<String>) -> ProgressEvent {
        self.report(ProgressUpdate::info(message).with_step(step, total_steps))
            .await
    }
}
