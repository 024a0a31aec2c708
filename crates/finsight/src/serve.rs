// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `finsight serve` and `finsight worker` implementations.
//!
//! Opens the shared store, starts the worker pool and the lease reclaim
//! sweep, and (for `serve`) the HTTP gateway. Everything stops on
//! SIGINT/SIGTERM; in-flight jobs finish before the store is closed.

use std::sync::Arc;

use finsight_bus::ProgressBroadcaster;
use finsight_config::model::FinsightConfig;
use finsight_core::{FinsightError, StorageAdapter};
use finsight_gateway::{AuthConfig, GatewayState, start_server};
use finsight_storage::SqliteStorage;
use finsight_worker::CommandExecutor;
use finsight_worker::shutdown;
use tracing::{info, warn};

use crate::pool;

/// Which long-running services this process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Gateway plus workers.
    Serve,
    /// Workers only.
    WorkersOnly,
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `finsight` crates log at
/// `log_level` and everything else at `warn`.
pub fn init_tracing(log_level: &str, log_format: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("finsight={log_level},warn")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false);

    if log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run until a shutdown signal arrives.
pub async fn run_serve(config: FinsightConfig, mode: Mode) -> Result<(), FinsightError> {
    info!(
        service = %config.service.name,
        database = %config.storage.database_path,
        ?mode,
        "finsight starting"
    );

    let store = Arc::new(SqliteStorage::open(&config).await?);
    let broadcaster = ProgressBroadcaster::new();
    let cancel = shutdown::install_signal_handler();

    let workers = match CommandExecutor::from_config(&config.worker) {
        Some(executor) => {
            let handles = pool::spawn_workers(
                &config,
                store.clone(),
                broadcaster.clone(),
                Arc::new(executor),
                cancel.clone(),
            );
            info!(count = handles.len(), "analysis workers started");
            handles
        }
        None => {
            warn!("worker.command is not configured; no analysis workers started");
            Vec::new()
        }
    };

    let sweep = pool::spawn_reclaim_sweep(
        store.clone(),
        config.queue.reclaim_interval(),
        cancel.clone(),
    );

    let gateway_result = if mode == Mode::Serve && config.gateway.enabled {
        let state = GatewayState::new(store.clone(), store.clone(), broadcaster.clone())
            .with_auth(AuthConfig {
                bearer_token: config.gateway.bearer_token.clone(),
            })
            .with_default_lock_ttl(config.lock.default_ttl())
            .with_heartbeat(config.gateway.heartbeat())
            .with_shutdown(cancel.clone());
        let result = start_server(&config.gateway, state).await;
        // A bind failure returns early; stop the background tasks with it.
        cancel.cancel();
        result
    } else {
        cancel.cancelled().await;
        Ok(())
    };

    for handle in workers {
        if let Err(e) = handle.await {
            warn!(error = %e, "worker task ended abnormally");
        }
    }
    if let Err(e) = sweep.await {
        warn!(error = %e, "reclaim sweep task ended abnormally");
    }

    store.close().await?;
    info!("finsight shutdown complete");
    gateway_result
}
