// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workers that claim analysis jobs, run them, and report progress.
//!
//! A worker polls the shared [`JobQueue`](finsight_core::JobQueue), hands
//! each claimed job to an [`AnalysisExecutor`], mirrors progress to the
//! live broadcaster and the job's durable log, and finishes with ack or
//! nack. Any number of workers, in any number of processes, may poll the
//! same store.

pub mod command;
pub mod executor;
pub mod reporter;
pub mod shutdown;
pub mod worker;

pub use command::CommandExecutor;
pub use executor::{AnalysisExecutor, ExecutionError};
pub use reporter::ProgressReporter;
pub use worker::{AnalysisWorker, JobOutcome};
