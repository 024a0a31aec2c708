// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Finsight analysis coordination layer.
//!
//! This crate provides the error type, the shared domain records (session
//! locks, analysis jobs, progress events), and the adapter traits that the
//! storage backend implements and the worker and gateway consume.

pub mod error;
pub mod time;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::FinsightError;
pub use types::{
    AnalysisJob, HealthStatus, JobStatus, NewAnalysisJob, ProgressEvent, ProgressLevel,
    ProgressLogEntry, QueueStats, SessionLock,
};

pub use traits::{JobQueue, SessionLockStore, StorageAdapter};
