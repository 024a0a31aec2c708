// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background tasks: the worker pool and the lease reclaim sweep.

use std::sync::Arc;
use std::time::Duration;

use finsight_bus::ProgressBroadcaster;
use finsight_config::model::{FinsightConfig, WorkerConfig};
use finsight_core::JobQueue;
use finsight_storage::SqliteStorage;
use finsight_worker::{AnalysisExecutor, AnalysisWorker};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker ids for a pool: the base id alone for a single worker,
/// `<base>-<n>` otherwise.
pub fn worker_ids(config: &WorkerConfig) -> Vec<String> {
    let base = config.resolved_worker_id();
    if config.concurrency <= 1 {
        return vec![base];
    }
    (1..=config.concurrency)
        .map(|n| format!("{base}-{n}"))
        .collect()
}

/// Spawn `worker.concurrency` workers sharing one store, broadcaster, and
/// executor. Each stops at its next poll after `cancel` fires.
pub fn spawn_workers(
    config: &FinsightConfig,
    store: Arc<SqliteStorage>,
    broadcaster: ProgressBroadcaster,
    executor: Arc<dyn AnalysisExecutor>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    worker_ids(&config.worker)
        .into_iter()
        .map(|worker_id| {
            let worker = AnalysisWorker::new(
                worker_id,
                store.clone(),
                store.clone(),
                broadcaster.clone(),
                Arc::clone(&executor),
            )
            .with_poll_interval(config.worker.poll_interval())
            .with_lock_extension(config.queue.lease())
            .with_lease_renewal(config.queue.lease() / 3);
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        })
        .collect()
}

/// Periodically return expired leases to the queue, so jobs stranded by a
/// dead worker recover even when no worker is polling. Lapsed lock rows
/// are purged on the same tick.
pub fn spawn_reclaim_sweep(
    store: Arc<SqliteStorage>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs_f64(), "lease reclaim sweep started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match store.reclaim_expired_leases().await {
                        Ok(0) => {}
                        Ok(n) => debug!(count = n, "sweep reclaimed leases"),
                        Err(e) => error!(error = %e, "lease reclaim sweep failed"),
                    }
                    match store.purge_expired_locks().await {
                        Ok(0) => {}
                        Ok(n) => debug!(count = n, "sweep purged expired session locks"),
                        Err(e) => warn!(error = %e, "expired lock purge failed"),
                    }
                }
            }
        }
        info!("lease reclaim sweep stopped");
    })
}
