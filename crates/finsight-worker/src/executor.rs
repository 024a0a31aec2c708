// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam between the worker loop and whatever performs the analysis.

use async_trait::async_trait;
use finsight_core::AnalysisJob;

use crate::reporter::ProgressReporter;

/// Why an analysis did not produce a result.
///
/// The variant decides whether the job is requeued.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Worth another attempt: timeouts, unavailable providers, spawn failures.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help: bad input, a script that exits with an error.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ExecutionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ExecutionError::Transient(msg) | ExecutionError::Permanent(msg) => msg,
        }
    }
}

/// Runs the analysis for one claimed job.
#[async_trait]
pub trait AnalysisExecutor: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Execute `job`, reporting intermediate steps through `progress`.
    async fn execute(
        &self,
        job: &AnalysisJob,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, ExecutionError>;
}
