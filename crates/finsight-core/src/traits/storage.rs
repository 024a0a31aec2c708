// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base trait for persistence backends (SQLite, etc.).

use async_trait::async_trait;

use crate::error::FinsightError;
use crate::types::HealthStatus;

/// Lifecycle and health surface shared by every storage backend.
#[async_trait]
pub trait StorageAdapter: Send + Sync + 'static {
    /// Returns the human-readable name of this backend.
    fn name(&self) -> &str;

    /// Initializes the backend (migrations, connection, etc.).
    async fn initialize(&self) -> Result<(), FinsightError>;

    /// Performs a health check and returns the backend's current status.
    async fn health_check(&self) -> Result<HealthStatus, FinsightError>;

    /// Flushes pending writes and releases the connection.
    async fn close(&self) -> Result<(), FinsightError>;
}
