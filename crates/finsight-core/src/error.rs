// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Finsight coordination layer.
//!
//! Contention (a busy session lock, an empty queue, a job already claimed)
//! is never an error: those outcomes are reported through `bool` and
//! `Option` returns. The variants here are reserved for infrastructure and
//! configuration failures that callers must not silently ignore.

use thiserror::Error;

/// The primary error type used across all Finsight adapter traits and core operations.
#[derive(Debug, Error)]
pub enum FinsightError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A record that the caller addressed directly does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Analysis execution errors raised outside the executor's own error type.
    #[error("execution error: {message}")]
    Execution {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// HTTP gateway errors (bind failure, server crash).
    #[error("gateway error: {message}")]
    Gateway {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FinsightError {
    /// Wraps any error as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            source: Box::new(err),
        }
    }
}
