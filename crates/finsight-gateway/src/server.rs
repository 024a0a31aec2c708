// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use finsight_bus::{DEFAULT_HEARTBEAT, ProgressBroadcaster};
use finsight_config::model::GatewayConfig;
use finsight_core::{FinsightError, JobQueue, SessionLockStore};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, auth_middleware};
use crate::{handlers, sse};

/// State for the unauthenticated health endpoint.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: Instant,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub locks: Arc<dyn SessionLockStore>,
    pub queue: Arc<dyn JobQueue>,
    pub broadcaster: ProgressBroadcaster,
    pub auth: AuthConfig,
    pub health: HealthState,
    /// TTL for session locks taken on submit when the request names none.
    pub default_lock_ttl: Duration,
    /// Idle window before an SSE heartbeat.
    pub heartbeat: Duration,
    /// Ends open event streams so graceful shutdown can complete.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(
        locks: Arc<dyn SessionLockStore>,
        queue: Arc<dyn JobQueue>,
        broadcaster: ProgressBroadcaster,
    ) -> Self {
        Self {
            locks,
            queue,
            broadcaster,
            auth: AuthConfig::default(),
            health: HealthState {
                start_time: Instant::now(),
            },
            default_lock_ttl: Duration::from_secs(300),
            heartbeat: DEFAULT_HEARTBEAT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_default_lock_ttl(mut self, ttl: Duration) -> Self {
        self.default_lock_ttl = ttl;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Build the full application router.
///
/// - GET /health (never authenticated)
/// - POST /v1/analyses, GET /v1/analyses/{job_id}
/// - GET /v1/sessions/{session_id}/events (SSE)
/// - GET | DELETE /v1/sessions/{session_id}/lock
/// - GET /v1/locks, GET /v1/queue/stats
pub fn build_router(state: GatewayState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let mut api_routes = Router::new()
        .route("/v1/analyses", post(handlers::post_analysis))
        .route("/v1/analyses/{job_id}", get(handlers::get_analysis))
        .route(
            "/v1/sessions/{session_id}/events",
            get(sse::stream_session_events),
        )
        .route(
            "/v1/sessions/{session_id}/lock",
            get(handlers::get_session_lock).delete(handlers::delete_session_lock),
        )
        .route("/v1/locks", get(handlers::get_locks))
        .route("/v1/queue/stats", get(handlers::get_queue_stats));

    if state.auth.is_enabled() {
        api_routes = api_routes.route_layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ));
    }

    Router::new()
        .merge(public_routes)
        .merge(api_routes.with_state(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind `host:port` and serve until `state.shutdown` is cancelled.
pub async fn start_server(config: &GatewayConfig, state: GatewayState) -> Result<(), FinsightError> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FinsightError::Gateway {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("Gateway server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| FinsightError::Gateway {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("Gateway server stopped");
    Ok(())
}
