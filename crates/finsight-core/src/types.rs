// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the lock store, the job queue, the progress bus,
//! and the HTTP gateway.
//!
//! Field names match the persisted/wire shapes exactly; the gateway serializes
//! these structs directly.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

// --- Session lock ---

/// A persisted mutual-exclusion record for one chat session.
///
/// At most one non-expired record exists per `session_id`. Expired records
/// are treated as absent and are overwritten by the next successful acquire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLock {
    /// Session the lock serializes.
    pub session_id: String,
    /// Opaque identifier of the operation holding the lock (usually a message id).
    pub holder_message_id: String,
    /// When the current holder acquired the lock.
    pub acquired_at: String,
    /// When the lock lapses unless extended.
    pub expires_at: String,
}

impl SessionLock {
    /// Whether the lock has lapsed at the given timestamp.
    pub fn is_expired_at(&self, now: &str) -> bool {
        self.expires_at.as_str() <= now
    }
}

// --- Analysis jobs ---

/// Lifecycle state of an analysis job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Leased to a worker.
    Claimed,
    /// Finished successfully; `result` is set.
    Completed,
    /// Finished unsuccessfully with no retries left; `error` is set.
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs never change state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Producer-side input for [`crate::JobQueue::enqueue_analysis`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnalysisJob {
    pub session_id: String,
    pub message_id: String,
    /// Question and parameters handed to the analysis executor.
    pub payload: serde_json::Value,
}

/// One durable progress entry appended to a job while it executes.
///
/// Mirrors [`ProgressEvent`] so the history survives when nobody was
/// subscribed to the live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressLogEntry {
    pub timestamp: String,
    pub level: ProgressLevel,
    pub message: String,
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default, rename = "totalSteps")]
    pub total_steps: Option<u32>,
    #[serde(default = "empty_details")]
    pub details: serde_json::Value,
}

impl From<&ProgressEvent> for ProgressLogEntry {
    fn from(event: &ProgressEvent) -> Self {
        Self {
            timestamp: event.timestamp.clone(),
            level: event.level,
            message: event.message.clone(),
            step: event.step,
            total_steps: event.total_steps,
            details: event.details.clone(),
        }
    }
}

/// The canonical queue record for one analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: String,
    pub session_id: String,
    pub message_id: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Owner of the lease while `status` is `claimed`.
    pub worker_id: Option<String>,
    pub claimed_at: Option<String>,
    /// After this instant a `claimed` job may be reclaimed by another worker.
    pub lease_expires_at: Option<String>,
    /// Number of times the job has been claimed.
    pub attempt_count: u32,
    /// Ceiling on claims before a failing job becomes terminal.
    pub max_attempts: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub progress_log: Vec<ProgressLogEntry>,
    pub created_at: String,
    pub updated_at: String,
}

/// Point-in-time aggregate of job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    /// Jobs currently leased to a worker ("processing").
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    /// Sum over all statuses; equals the number of jobs ever enqueued.
    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.completed + self.failed
    }
}

// --- Progress events ---

/// Severity of a progress event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProgressLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A live step-by-step update for one session.
///
/// Events are never persisted by the broadcaster; they exist only while being
/// delivered to the subscribers registered at emit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: String,
    /// ISO-8601 creation time.
    pub timestamp: String,
    pub level: ProgressLevel,
    pub message: String,
    pub step: Option<u32>,
    #[serde(rename = "totalSteps")]
    pub total_steps: Option<u32>,
    #[serde(default = "empty_details")]
    pub details: serde_json::Value,
}

fn empty_details() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
