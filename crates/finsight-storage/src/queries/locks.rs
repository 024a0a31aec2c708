// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lock operations.
//!
//! Expiry is lazy: an expired row stays in the table until the next acquire
//! overwrites it or a release deletes it, and every read filters on
//! `expires_at > now`.

use std::time::Duration;

use chrono::Utc;
use finsight_core::time::{add_duration, format_timestamp, now_timestamp, parse_timestamp};
use finsight_core::{FinsightError, SessionLock};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::database::{map_tr_err, Database};

/// Atomically take the lock for `holder_id`.
///
/// One upsert statement: the insert wins on a free session; on conflict the
/// row is only overwritten when it has expired or already belongs to
/// `holder_id`. The lock is held iff exactly one row changed.
pub async fn acquire(
    db: &Database,
    session_id: &str,
    holder_id: &str,
    ttl: Duration,
) -> Result<bool, FinsightError> {
    let session_id = session_id.to_string();
    let holder_id = holder_id.to_string();
    let now = Utc::now();
    let acquired_at = format_timestamp(now);
    let expires_at = format_timestamp(add_duration(now, ttl));

    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "INSERT INTO session_locks (session_id, holder_message_id, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                     acquired_at = CASE
                         WHEN session_locks.holder_message_id = excluded.holder_message_id
                              AND session_locks.expires_at > excluded.acquired_at
                         THEN session_locks.acquired_at
                         ELSE excluded.acquired_at
                     END,
                     holder_message_id = excluded.holder_message_id,
                     expires_at = excluded.expires_at
                 WHERE session_locks.expires_at <= excluded.acquired_at
                    OR session_locks.holder_message_id = excluded.holder_message_id",
                params![session_id, holder_id, acquired_at, expires_at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete the lock regardless of holder.
pub async fn release(db: &Database, session_id: &str) -> Result<(), FinsightError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM session_locks WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Delete the lock only if `holder_id` holds it.
pub async fn release_held_by(
    db: &Database,
    session_id: &str,
    holder_id: &str,
) -> Result<bool, FinsightError> {
    let session_id = session_id.to_string();
    let holder_id = holder_id.to_string();
    db.connection()
        .call(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM session_locks WHERE session_id = ?1 AND holder_message_id = ?2",
                params![session_id, holder_id],
            )?;
            Ok(deleted > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// The live lock for a session, if any.
pub async fn get_active(
    db: &Database,
    session_id: &str,
) -> Result<Option<SessionLock>, FinsightError> {
    let session_id = session_id.to_string();
    let now = now_timestamp();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT session_id, holder_message_id, acquired_at, expires_at
                 FROM session_locks WHERE session_id = ?1 AND expires_at > ?2",
                params![session_id, now],
                row_to_lock,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Push a live lock's expiry forward by `additional_ttl`.
///
/// With `holder_id` set, only that holder's lock is extended. Returns `false`
/// when there is nothing live to extend.
pub async fn extend(
    db: &Database,
    session_id: &str,
    holder_id: Option<&str>,
    additional_ttl: Duration,
) -> Result<bool, FinsightError> {
    let session_id = session_id.to_string();
    let holder_id = holder_id.map(str::to_string);
    let now = now_timestamp();

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current: Option<(String, String)> = tx
                .query_row(
                    "SELECT holder_message_id, expires_at FROM session_locks
                     WHERE session_id = ?1 AND expires_at > ?2",
                    params![session_id, now],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((holder, expires_at)) = current else {
                return Ok(false);
            };
            if holder_id.as_deref().is_some_and(|h| h != holder) {
                return Ok(false);
            }

            let base = parse_timestamp(&expires_at).unwrap_or_else(Utc::now);
            let extended = format_timestamp(add_duration(base, additional_ttl));
            tx.execute(
                "UPDATE session_locks SET expires_at = ?1 WHERE session_id = ?2",
                params![extended, session_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)
}

/// Every non-expired lock, oldest acquisition first.
pub async fn list_active(db: &Database) -> Result<Vec<SessionLock>, FinsightError> {
    let now = now_timestamp();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, holder_message_id, acquired_at, expires_at
                 FROM session_locks WHERE expires_at > ?1
                 ORDER BY acquired_at ASC",
            )?;
            let rows = stmt.query_map(params![now], row_to_lock)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete expired rows. Returns how many were removed.
pub async fn purge_expired(db: &Database) -> Result<u64, FinsightError> {
    let now = now_timestamp();
    db.connection()
        .call(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM session_locks WHERE expires_at <= ?1",
                params![now],
            )?;
            Ok(deleted as u64)
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_lock(row: &rusqlite::Row<'_>) -> Result<SessionLock, rusqlite::Error> {
    Ok(SessionLock {
        session_id: row.get(0)?,
        holder_message_id: row.get(1)?,
        acquired_at: row.get(2)?,
        expires_at: row.get(3)?,
    })
}
