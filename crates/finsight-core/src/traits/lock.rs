// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session distributed lock backed by the persistent store.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::FinsightError;
use crate::traits::storage::StorageAdapter;
use crate::types::SessionLock;

/// Serializes analysis requests against the same chat session.
///
/// The store is the sole arbiter: acquisition is a single atomic
/// conditional write, so two racing callers (in any number of processes)
/// cannot both win. Store failures are returned as errors, never folded
/// into `false`, because losing the lock guarantee would allow the same
/// session to run twice.
#[async_trait]
pub trait SessionLockStore: StorageAdapter {
    /// Takes the lock for `holder_id` if it is free, expired, or already held
    /// by `holder_id` (which refreshes the expiry). Returns `false` when a live
    /// lock belongs to a different holder.
    async fn acquire_lock(
        &self,
        session_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, FinsightError>;

    /// Deletes the lock regardless of holder. Releasing an absent lock is a no-op.
    async fn release_lock(&self, session_id: &str) -> Result<(), FinsightError>;

    /// Deletes the lock only if `holder_id` holds it. Returns whether a
    /// record was removed.
    async fn release_lock_held_by(
        &self,
        session_id: &str,
        holder_id: &str,
    ) -> Result<bool, FinsightError>;

    /// True iff a record exists and has not expired.
    async fn is_session_locked(&self, session_id: &str) -> Result<bool, FinsightError>;

    /// The holder of the live lock, if any.
    async fn get_active_message(&self, session_id: &str)
    -> Result<Option<String>, FinsightError>;

    /// Pushes a live lock's expiry forward by `additional_ttl`. Returns `false`
    /// (without error) when no live lock exists.
    async fn extend_lock(
        &self,
        session_id: &str,
        additional_ttl: Duration,
    ) -> Result<bool, FinsightError>;

    /// Like [`extend_lock`](Self::extend_lock) but only for the given holder.
    async fn extend_lock_held_by(
        &self,
        session_id: &str,
        holder_id: &str,
        additional_ttl: Duration,
    ) -> Result<bool, FinsightError>;

    /// All non-expired locks, for operational visibility.
    async fn list_active_locks(&self) -> Result<Vec<SessionLock>, FinsightError>;
}
