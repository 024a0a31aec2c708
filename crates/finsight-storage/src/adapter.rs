// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the lock store and job queue traits.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use finsight_config::model::{FinsightConfig, QueueConfig, StorageConfig};
use finsight_core::{
    AnalysisJob, FinsightError, HealthStatus, JobQueue, NewAnalysisJob, ProgressLogEntry,
    QueueStats, SessionLock, SessionLockStore, StorageAdapter,
};

use crate::database::{map_tr_err, Database};
use crate::queries;
use crate::queries::jobs::QueuePolicy;

/// SQLite-backed coordination store.
///
/// One instance serves both the lock table and the job queue. The database
/// is opened lazily by [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    storage: StorageConfig,
    policy: QueuePolicy,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a store; nothing is opened until [`initialize`](StorageAdapter::initialize).
    pub fn new(storage: StorageConfig, queue: &QueueConfig) -> Self {
        Self {
            storage,
            policy: QueuePolicy {
                lease: queue.lease(),
                max_attempts: queue.max_attempts,
                retry_backoff: queue.retry_backoff(),
            },
            db: OnceCell::new(),
        }
    }

    /// Create and initialize a store from the full configuration.
    pub async fn open(config: &FinsightConfig) -> Result<Self, FinsightError> {
        let storage = Self::new(config.storage.clone(), &config.queue);
        storage.initialize().await?;
        Ok(storage)
    }

    /// The underlying database handle.
    pub fn database(&self) -> Result<&Database, FinsightError> {
        self.db.get().ok_or_else(|| FinsightError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }

    /// Lease applied to every claim.
    pub fn lease(&self) -> Duration {
        self.policy.lease
    }

    /// All jobs submitted for one session, oldest first.
    pub async fn list_session_jobs(
        &self,
        session_id: &str,
    ) -> Result<Vec<AnalysisJob>, FinsightError> {
        queries::jobs::list_for_session(self.database()?, session_id).await
    }

    /// Delete lock rows that have already lapsed.
    pub async fn purge_expired_locks(&self) -> Result<u64, FinsightError> {
        queries::locks::purge_expired(self.database()?).await
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn initialize(&self) -> Result<(), FinsightError> {
        let db = Database::open_with(&self.storage).await?;
        self.db.set(db).map_err(|_| FinsightError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.storage.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus, FinsightError> {
        let db = match self.database() {
            Ok(db) => db,
            Err(e) => return Ok(HealthStatus::Unhealthy(e.to_string())),
        };
        let ping = db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err);
        Ok(match ping {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }

    async fn close(&self) -> Result<(), FinsightError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl SessionLockStore for SqliteStorage {
    async fn acquire_lock(
        &self,
        session_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, FinsightError> {
        queries::locks::acquire(self.database()?, session_id, holder_id, ttl).await
    }

    async fn release_lock(&self, session_id: &str) -> Result<(), FinsightError> {
        queries::locks::release(self.database()?, session_id).await
    }

    async fn release_lock_held_by(
        &self,
        session_id: &str,
        holder_id: &str,
    ) -> Result<bool, FinsightError> {
        queries::locks::release_held_by(self.database()?, session_id, holder_id).await
    }

    async fn is_session_locked(&self, session_id: &str) -> Result<bool, FinsightError> {
        Ok(queries::locks::get_active(self.database()?, session_id)
            .await?
            .is_some())
    }

    async fn get_active_message(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, FinsightError> {
        Ok(queries::locks::get_active(self.database()?, session_id)
            .await?
            .map(|lock| lock.holder_message_id))
    }

    async fn extend_lock(
        &self,
        session_id: &str,
        additional_ttl: Duration,
    ) -> Result<bool, FinsightError> {
        queries::locks::extend(self.database()?, session_id, None, additional_ttl).await
    }

    async fn extend_lock_held_by(
        &self,
        session_id: &str,
        holder_id: &str,
        additional_ttl: Duration,
    ) -> Result<bool, FinsightError> {
        queries::locks::extend(self.database()?, session_id, Some(holder_id), additional_ttl)
            .await
    }

    async fn list_active_locks(&self) -> Result<Vec<SessionLock>, FinsightError> {
        queries::locks::list_active(self.database()?).await
    }
}

#[async_trait]
impl JobQueue for SqliteStorage {
    async fn enqueue_analysis(&self, job: NewAnalysisJob) -> Result<String, FinsightError> {
        queries::jobs::enqueue(self.database()?, job, self.policy.max_attempts).await
    }

    async fn dequeue_analysis(
        &self,
        worker_id: &str,
    ) -> Result<Option<AnalysisJob>, FinsightError> {
        queries::jobs::dequeue(self.database()?, worker_id, self.policy).await
    }

    async fn ack_analysis(
        &self,
        job_id: &str,
        worker_id: &str,
        result: serde_json::Value,
    ) -> Result<bool, FinsightError> {
        queries::jobs::ack(self.database()?, job_id, worker_id, &result).await
    }

    async fn nack_analysis(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<bool, FinsightError> {
        queries::jobs::nack(self.database()?, job_id, worker_id, error, retry, self.policy).await
    }

    async fn renew_lease(&self, job_id: &str, worker_id: &str) -> Result<bool, FinsightError> {
        queries::jobs::renew_lease(self.database()?, job_id, worker_id, self.policy.lease).await
    }

    async fn get_queue_stats(&self) -> Result<QueueStats, FinsightError> {
        queries::jobs::stats(self.database()?).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<AnalysisJob>, FinsightError> {
        queries::jobs::get(self.database()?, job_id).await
    }

    async fn append_job_log(
        &self,
        job_id: &str,
        entry: &ProgressLogEntry,
    ) -> Result<bool, FinsightError> {
        queries::jobs::append_log(self.database()?, job_id, entry).await
    }

    async fn reclaim_expired_leases(&self) -> Result<u64, FinsightError> {
        queries::jobs::reclaim_expired(self.database()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn storage_in(dir: &tempfile::TempDir) -> SqliteStorage {
        let storage = StorageConfig {
            database_path: dir.path().join("adapter.db").to_str().unwrap().to_string(),
            ..StorageConfig::default()
        };
        SqliteStorage::new(storage, &QueueConfig::default())
    }

    #[tokio::test]
    async fn operations_before_initialize_error() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir);
        assert!(storage.is_session_locked("s").await.is_err());
        assert!(matches!(
            storage.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
    }

    #[tokio::test]
    async fn double_initialize_errors() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir);
        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn lock_surface_round_trip() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir);
        storage.initialize().await.unwrap();

        let ttl = Duration::from_secs(60);
        assert!(storage.acquire_lock("s1", "m1", ttl).await.unwrap());
        assert!(storage.is_session_locked("s1").await.unwrap());
        assert_eq!(
            storage.get_active_message("s1").await.unwrap().as_deref(),
            Some("m1")
        );
        assert!(storage.extend_lock("s1", ttl).await.unwrap());
        assert!(!storage.extend_lock_held_by("s1", "m2", ttl).await.unwrap());
        assert_eq!(storage.list_active_locks().await.unwrap().len(), 1);

        storage.release_lock("s1").await.unwrap();
        assert!(!storage.is_session_locked("s1").await.unwrap());
        assert!(storage.get_active_message("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queue_surface_uses_configured_attempts() {
        let dir = tempdir().unwrap();
        let queue = QueueConfig {
            max_attempts: 1,
            ..QueueConfig::default()
        };
        let storage = SqliteStorage::new(
            StorageConfig {
                database_path: dir.path().join("q.db").to_str().unwrap().to_string(),
                ..StorageConfig::default()
            },
            &queue,
        );
        storage.initialize().await.unwrap();

        let id = storage
            .enqueue_analysis(NewAnalysisJob {
                session_id: "s1".into(),
                message_id: "m1".into(),
                payload: json!({"ticker": "MSFT"}),
            })
            .await
            .unwrap();
        let job = storage.dequeue_analysis("w1").await.unwrap().unwrap();
        assert_eq!(job.max_attempts, 1);

        // One attempt allowed, so a retryable failure is still terminal.
        assert!(storage.nack_analysis(&id, "w1", "flaky", true).await.unwrap());
        let job = storage.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, finsight_core::JobStatus::Failed);

        let stats = storage.get_queue_stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(storage.reclaim_expired_leases().await.unwrap(), 0);
    }
}
