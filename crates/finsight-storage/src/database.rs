// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! Within a process every statement runs on tokio-rusqlite's single
//! background thread. Other processes (more workers, the gateway) open their
//! own `Database` on the same file; SQLite's write lock plus `busy_timeout`
//! serializes them.

use std::path::Path;
use std::time::Duration;

use finsight_config::model::StorageConfig;
use finsight_core::FinsightError;
use tracing::debug;

use crate::migrations;

/// Convert a tokio-rusqlite error into [`FinsightError::Storage`].
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> FinsightError {
    FinsightError::Storage {
        source: Box::new(e),
    }
}

/// An open, migrated SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open with default settings (WAL on, 5s busy timeout).
    pub async fn open(path: &str) -> Result<Self, FinsightError> {
        let config = StorageConfig {
            database_path: path.to_string(),
            ..StorageConfig::default()
        };
        Self::open_with(&config).await
    }

    /// Open the database described by `config`, creating parent directories,
    /// applying PRAGMAs, and running migrations.
    pub async fn open_with(config: &StorageConfig) -> Result<Self, FinsightError> {
        let path = config.database_path.clone();
        if let Some(parent) = Path::new(&path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(FinsightError::storage)?;
        }

        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(|e| FinsightError::Storage {
                source: Box::new(e),
            })?;

        let wal_mode = config.wal_mode;
        let busy_timeout = config.busy_timeout();
        conn.call(move |conn| apply_pragmas(conn, wal_mode, busy_timeout))
            .await
            .map_err(map_tr_err)?;

        conn.call(migrations::run_migrations)
            .await
            .map_err(migrations::map_migration_err)?;

        debug!(path = %path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite handle. Clones share the same background thread.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL so the main file is self-contained.
    pub async fn checkpoint(&self) -> Result<(), FinsightError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Checkpoint and drop this handle.
    pub async fn close(self) -> Result<(), FinsightError> {
        self.checkpoint().await?;
        debug!("database closed");
        Ok(())
    }
}

fn apply_pragmas(
    conn: &mut rusqlite::Connection,
    wal_mode: bool,
    busy_timeout: Duration,
) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    if wal_mode {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "journal mode set");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
