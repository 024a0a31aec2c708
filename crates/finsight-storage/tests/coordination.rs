// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-connection coordination tests.
//!
//! Each `SqliteStorage` opened here owns its own SQLite connection, so
//! contention between them exercises the database's own locking the same
//! way separate worker processes would.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use finsight_config::model::{QueueConfig, StorageConfig};
use finsight_core::{JobQueue, JobStatus, NewAnalysisJob, SessionLockStore, StorageAdapter};
use finsight_storage::SqliteStorage;
use serde_json::json;
use tempfile::TempDir;

async fn open_store(dir: &TempDir) -> SqliteStorage {
    let storage = StorageConfig {
        database_path: dir.path().join("shared.db").to_str().unwrap().to_string(),
        ..StorageConfig::default()
    };
    let store = SqliteStorage::new(storage, &QueueConfig::default());
    store.initialize().await.unwrap();
    store
}

/// Open `n` independent connections on the same file, one at a time so
/// migrations never race.
async fn open_stores(dir: &TempDir, n: usize) -> Vec<Arc<SqliteStorage>> {
    let mut stores = Vec::with_capacity(n);
    for _ in 0..n {
        stores.push(Arc::new(open_store(dir).await));
    }
    stores
}

fn job(session: &str, message: &str) -> NewAnalysisJob {
    NewAnalysisJob {
        session_id: session.to_string(),
        message_id: message.to_string(),
        payload: json!({"question": "What drove AAPL's revenue growth?"}),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquire_has_exactly_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let stores = open_stores(&dir, 8).await;

    let mut handles = Vec::new();
    for (i, store) in stores.iter().enumerate() {
        let store = Arc::clone(store);
        handles.push(tokio::spawn(async move {
            store
                .acquire_lock("session-race", &format!("msg-{i}"), Duration::from_secs(30))
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(stores[0].is_session_locked("session-race").await.unwrap());
}

#[tokio::test]
async fn release_twice_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    store.release_lock("never-locked").await.unwrap();
    assert!(store.acquire_lock("s", "m", Duration::from_secs(30)).await.unwrap());
    store.release_lock("s").await.unwrap();
    store.release_lock("s").await.unwrap();
    assert!(!store.is_session_locked("s").await.unwrap());
}

#[tokio::test]
async fn expired_lock_is_reacquired_by_new_holder_on_another_connection() {
    let dir = tempfile::tempdir().unwrap();
    let stores = open_stores(&dir, 2).await;

    assert!(stores[0].acquire_lock("s", "h1", Duration::from_millis(100)).await.unwrap());
    assert!(!stores[1].acquire_lock("s", "h2", Duration::from_secs(30)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(stores[1].acquire_lock("s", "h2", Duration::from_secs(30)).await.unwrap());
    assert_eq!(
        stores[0].get_active_message("s").await.unwrap().as_deref(),
        Some("h2")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_job_is_claimed_by_at_most_one_worker() {
    let dir = tempfile::tempdir().unwrap();
    let stores = open_stores(&dir, 2).await;
    stores[0].enqueue_analysis(job("s1", "m1")).await.unwrap();

    let a = {
        let store = Arc::clone(&stores[0]);
        tokio::spawn(async move { store.dequeue_analysis("worker-a").await.unwrap() })
    };
    let b = {
        let store = Arc::clone(&stores[1]);
        tokio::spawn(async move { store.dequeue_analysis("worker-b").await.unwrap() })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_drain_queue_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let stores = open_stores(&dir, 4).await;

    let mut enqueued = HashSet::new();
    for i in 0..20 {
        enqueued.insert(
            stores[0]
                .enqueue_analysis(job(&format!("s{i}"), &format!("m{i}")))
                .await
                .unwrap(),
        );
    }

    let mut handles = Vec::new();
    for (w, store) in stores.iter().enumerate() {
        let store = Arc::clone(store);
        handles.push(tokio::spawn(async move {
            let worker_id = format!("worker-{w}");
            let mut claimed = Vec::new();
            while let Some(job) = store.dequeue_analysis(&worker_id).await.unwrap() {
                assert!(store.ack_analysis(&job.job_id, &worker_id, json!({})).await.unwrap());
                claimed.push(job.job_id);
            }
            claimed
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }
    let unique: HashSet<String> = claimed.iter().cloned().collect();
    assert_eq!(claimed.len(), 20);
    assert_eq!(unique, enqueued);
    assert_eq!(stores[0].get_queue_stats().await.unwrap().completed, 20);
}

#[tokio::test]
async fn terminal_jobs_reject_further_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let id = store.enqueue_analysis(job("s1", "m1")).await.unwrap();
    store.dequeue_analysis("w1").await.unwrap().unwrap();
    assert!(store.ack_analysis(&id, "w1", json!({"ok": true})).await.unwrap());

    assert!(!store.ack_analysis(&id, "w1", json!({"ok": false})).await.unwrap());
    assert!(!store.nack_analysis(&id, "w1", "too late", true).await.unwrap());
    assert!(!store.nack_analysis(&id, "w1", "too late", false).await.unwrap());
    assert_eq!(
        store.get_job(&id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn retried_nack_makes_job_claimable_again() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let id = store.enqueue_analysis(job("s1", "m1")).await.unwrap();
    store.dequeue_analysis("w1").await.unwrap().unwrap();
    assert!(store.nack_analysis(&id, "w1", "upstream 503", true).await.unwrap());

    let reclaimed = store.dequeue_analysis("w2").await.unwrap().unwrap();
    assert_eq!(reclaimed.job_id, id);
    assert_eq!(reclaimed.worker_id.as_deref(), Some("w2"));
}

#[tokio::test]
async fn stats_account_for_every_enqueued_job() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(store.enqueue_analysis(job("s", &format!("m{i}"))).await.unwrap());
    }
    for _ in 0..4 {
        store.dequeue_analysis("w").await.unwrap().unwrap();
    }
    store.ack_analysis(&ids[0], "w", json!({})).await.unwrap();
    store.nack_analysis(&ids[1], "w", "bad input", false).await.unwrap();
    store.nack_analysis(&ids[2], "w", "retry me", true).await.unwrap();

    let stats = store.get_queue_stats().await.unwrap();
    assert_eq!(stats.total(), 6);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.pending, 3);
}

#[tokio::test]
async fn enqueue_claim_ack_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let id = store.enqueue_analysis(job("s1", "m1")).await.unwrap();

    let claimed = store.dequeue_analysis("w1").await.unwrap().unwrap();
    assert_eq!(claimed.job_id, id);
    assert_eq!(claimed.session_id, "s1");
    assert_eq!(claimed.message_id, "m1");

    assert!(store.dequeue_analysis("w1").await.unwrap().is_none());
    assert!(
        store
            .ack_analysis(&id, "w1", json!({"status": "completed"}))
            .await
            .unwrap()
    );
    assert!(store.get_queue_stats().await.unwrap().completed >= 1);
}

#[tokio::test]
async fn crashed_worker_lease_is_reclaimed_by_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig {
        database_path: dir.path().join("lease.db").to_str().unwrap().to_string(),
        ..StorageConfig::default()
    };
    let short_lease = QueueConfig {
        lease_secs: 1,
        ..QueueConfig::default()
    };
    let store = SqliteStorage::new(storage, &short_lease);
    store.initialize().await.unwrap();

    let id = store.enqueue_analysis(job("s1", "m1")).await.unwrap();
    store.dequeue_analysis("doomed").await.unwrap().unwrap();
    assert_eq!(store.reclaim_expired_leases().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(store.reclaim_expired_leases().await.unwrap(), 1);

    let job = store.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.worker_id.is_none());
    assert_eq!(job.attempt_count, 1);
}

#[tokio::test]
async fn stale_worker_cannot_finish_reclaimed_job() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig {
        database_path: dir.path().join("stale.db").to_str().unwrap().to_string(),
        ..StorageConfig::default()
    };
    let short_lease = QueueConfig {
        lease_secs: 1,
        ..QueueConfig::default()
    };
    let store = SqliteStorage::new(storage, &short_lease);
    store.initialize().await.unwrap();

    let id = store.enqueue_analysis(job("s1", "m1")).await.unwrap();
    store.dequeue_analysis("slow").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let second = store.dequeue_analysis("fresh").await.unwrap().unwrap();
    assert_eq!(second.job_id, id);

    assert!(!store.ack_analysis(&id, "slow", json!({"by": "slow"})).await.unwrap());
    assert!(!store.nack_analysis(&id, "slow", "gave up", false).await.unwrap());
    assert!(!store.renew_lease(&id, "slow").await.unwrap());

    assert!(store.renew_lease(&id, "fresh").await.unwrap());
    assert!(store.ack_analysis(&id, "fresh", json!({"by": "fresh"})).await.unwrap());
    let done = store.get_job(&id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result, Some(json!({"by": "fresh"})));
}
