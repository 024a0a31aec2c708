// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `finsight status` command implementation.
//!
//! Reads the shared store directly, so it works whether or not a gateway
//! is running.

use std::io::IsTerminal;

use finsight_config::model::FinsightConfig;
use finsight_core::{
    AnalysisJob, FinsightError, JobQueue, JobStatus, QueueStats, SessionLock, SessionLockStore,
    StorageAdapter,
};
use finsight_storage::SqliteStorage;
use serde::Serialize;

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database: String,
    pub queue: QueueStats,
    pub total: u64,
    pub locks: Vec<SessionLock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_jobs: Option<Vec<AnalysisJob>>,
}

/// Collect a report from an initialized store.
pub async fn collect(
    store: &SqliteStorage,
    database: &str,
    session: Option<&str>,
) -> Result<StatusReport, FinsightError> {
    let queue = store.get_queue_stats().await?;
    let locks = store.list_active_locks().await?;
    let session_jobs = match session {
        Some(session_id) => Some(store.list_session_jobs(session_id).await?),
        None => None,
    };
    Ok(StatusReport {
        database: database.to_string(),
        total: queue.total(),
        queue,
        locks,
        session_jobs,
    })
}

/// Run the `finsight status` command.
///
/// If `--json` is passed, outputs structured JSON for scripting.
/// If `--plain` is passed or stdout is not a TTY, disables colors.
pub async fn run_status(
    config: &FinsightConfig,
    json: bool,
    plain: bool,
    session: Option<&str>,
) -> Result<(), FinsightError> {
    let store = SqliteStorage::open(config).await?;
    let report = collect(&store, &config.storage.database_path, session).await;
    store.close().await?;
    let report = report?;

    if json {
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|e| FinsightError::Internal(format!("failed to render status: {e}")))?;
        println!("{rendered}");
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print!("{}", render_text(&report, use_color));
    }
    Ok(())
}

fn render_text(report: &StatusReport, use_color: bool) -> String {
    use colored::Colorize;
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "  finsight status");
    let _ = writeln!(out, "  {}", "-".repeat(35));
    let _ = writeln!(out, "    Database:  {}", report.database);

    let q = &report.queue;
    if use_color {
        let _ = writeln!(
            out,
            "    Queue:     {} pending, {} processing, {} completed, {} failed",
            q.pending.to_string().yellow(),
            q.claimed.to_string().cyan(),
            q.completed.to_string().green(),
            q.failed.to_string().red(),
        );
    } else {
        let _ = writeln!(
            out,
            "    Queue:     {} pending, {} processing, {} completed, {} failed",
            q.pending, q.claimed, q.completed, q.failed
        );
    }
    let _ = writeln!(out, "    Total:     {}", report.total);

    if report.locks.is_empty() {
        let _ = writeln!(out, "    Locks:     none");
    } else {
        let _ = writeln!(out, "    Locks:     {}", report.locks.len());
        for lock in &report.locks {
            let session = if use_color {
                lock.session_id.bold().to_string()
            } else {
                lock.session_id.clone()
            };
            let _ = writeln!(
                out,
                "      {session}  held by {} until {}",
                lock.holder_message_id, lock.expires_at
            );
        }
    }

    if let Some(jobs) = &report.session_jobs {
        let _ = writeln!(out, "    Jobs:      {}", jobs.len());
        for job in jobs {
            let status = job.status.to_string();
            let status = match (use_color, job.status) {
                (false, _) => status,
                (true, JobStatus::Completed) => status.green().to_string(),
                (true, JobStatus::Failed) => status.red().to_string(),
                (true, JobStatus::Claimed) => status.cyan().to_string(),
                (true, JobStatus::Pending) => status.yellow().to_string(),
            };
            let _ = writeln!(
                out,
                "      {}  {status}  attempt {}/{}",
                job.job_id, job.attempt_count, job.max_attempts
            );
            if let Some(error) = &job.error {
                let _ = writeln!(out, "        error: {error}");
            }
        }
    }
    let _ = writeln!(out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use finsight_config::model::StorageConfig;
    use finsight_core::NewAnalysisJob;

    async fn open_store(dir: &tempfile::TempDir) -> (SqliteStorage, String) {
        let path = dir.path().join("status.db").to_str().unwrap().to_string();
        let config = FinsightConfig {
            storage: StorageConfig {
                database_path: path.clone(),
                ..StorageConfig::default()
            },
            ..FinsightConfig::default()
        };
        (SqliteStorage::open(&config).await.unwrap(), path)
    }

    #[tokio::test]
    async fn report_counts_jobs_and_locks() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = open_store(&dir).await;

        store
            .acquire_lock("s1", "m1", Duration::from_secs(60))
            .await
            .unwrap();
        for (session, message) in [("s1", "m1"), ("s2", "m2")] {
            store
                .enqueue_analysis(NewAnalysisJob {
                    session_id: session.into(),
                    message_id: message.into(),
                    payload: serde_json::json!({}),
                })
                .await
                .unwrap();
        }

        let report = collect(&store, &path, Some("s1")).await.unwrap();
        assert_eq!(report.queue.pending, 2);
        assert_eq!(report.total, 2);
        assert_eq!(report.locks.len(), 1);
        assert_eq!(report.session_jobs.as_ref().unwrap().len(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["queue"]["pending"], 2);
        assert_eq!(json["locks"][0]["holder_message_id"], "m1");
    }

    #[tokio::test]
    async fn plain_text_has_no_color_codes() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = open_store(&dir).await;
        let report = collect(&store, &path, None).await.unwrap();

        let text = render_text(&report, false);
        assert!(text.contains("0 pending, 0 processing, 0 completed, 0 failed"));
        assert!(text.contains("Locks:     none"));
        assert!(!text.contains("Jobs:"));
        assert!(!text.contains('\u{1b}'));
        assert!(report.session_jobs.is_none());
    }
}
