// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST API.

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use finsight_core::{FinsightError, HealthStatus, NewAnalysisJob, QueueStats, SessionLock};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::server::GatewayState;

/// Request body for POST /v1/analyses.
#[derive(Debug, Deserialize)]
pub struct SubmitAnalysisRequest {
    pub session_id: String,
    /// Identifies this request as the lock holder. Generated when absent.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Question and parameters for the executor.
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
    /// Session lock TTL override, in seconds.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// 202 body for an accepted submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAnalysisResponse {
    pub job_id: String,
    pub session_id: String,
    pub message_id: String,
}

/// 409 body when the session already has an active request.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionLockedResponse {
    pub error: String,
    pub session_id: String,
    pub active_message_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockStatusResponse {
    pub session_id: String,
    pub locked: bool,
    pub active_message_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockListResponse {
    pub locks: Vec<SessionLock>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStatsResponse {
    #[serde(flatten)]
    pub stats: QueueStats,
    pub total: u64,
}

/// Response body for GET /health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseLockQuery {
    /// Only release if this holder owns the lock.
    #[serde(default)]
    pub holder: Option<String>,
}

/// Maps store failures onto HTTP responses.
pub struct ApiError(FinsightError);

impl From<FinsightError> for ApiError {
    fn from(err: FinsightError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FinsightError::NotFound { .. } => StatusCode::NOT_FOUND,
            FinsightError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        error_response(status, self.0.to_string())
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// POST /v1/analyses
///
/// Takes the session lock for the request's message, then enqueues the
/// job. A busy session answers 409 without enqueuing anything.
pub async fn post_analysis(
    State(state): State<GatewayState>,
    Json(body): Json<SubmitAnalysisRequest>,
) -> Result<Response, ApiError> {
    let session_id = body.session_id.trim().to_string();
    if session_id.is_empty() {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            "session_id must not be empty",
        ));
    }
    let message_id = body
        .message_id
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ttl = body
        .ttl_secs
        .map(Duration::from_secs)
        .unwrap_or(state.default_lock_ttl);

    if !state.locks.acquire_lock(&session_id, &message_id, ttl).await? {
        let active_message_id = state.locks.get_active_message(&session_id).await?;
        info!(session_id = %session_id, "analysis rejected: session locked");
        return Ok((
            StatusCode::CONFLICT,
            Json(SessionLockedResponse {
                error: "session locked".to_string(),
                session_id,
                active_message_id,
            }),
        )
            .into_response());
    }

    let job = NewAnalysisJob {
        session_id: session_id.clone(),
        message_id: message_id.clone(),
        payload: body.payload,
    };
    let job_id = match state.queue.enqueue_analysis(job).await {
        Ok(job_id) => job_id,
        Err(e) => {
            if let Err(release_err) = state
                .locks
                .release_lock_held_by(&session_id, &message_id)
                .await
            {
                warn!(
                    session_id = %session_id,
                    error = %release_err,
                    "failed to release lock after enqueue failure"
                );
            }
            return Err(e.into());
        }
    };

    info!(job_id = %job_id, session_id = %session_id, "analysis accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitAnalysisResponse {
            job_id,
            session_id,
            message_id,
        }),
    )
        .into_response())
}

/// GET /v1/analyses/{job_id}
pub async fn get_analysis(
    State(state): State<GatewayState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.queue.get_job(&job_id).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Err(FinsightError::NotFound {
            kind: "analysis job".to_string(),
            id: job_id,
        }
        .into()),
    }
}

/// GET /v1/sessions/{session_id}/lock
pub async fn get_session_lock(
    State(state): State<GatewayState>,
    Path(session_id): Path<String>,
) -> Result<Json<LockStatusResponse>, ApiError> {
    let active_message_id = state.locks.get_active_message(&session_id).await?;
    Ok(Json(LockStatusResponse {
        session_id,
        locked: active_message_id.is_some(),
        active_message_id,
    }))
}

/// DELETE /v1/sessions/{session_id}/lock[?holder=<message_id>]
///
/// Without `holder` the lock is released unconditionally. With it, the
/// release only happens for that holder; a lock owned by someone else
/// answers 409. Releasing an absent lock is a no-op.
pub async fn delete_session_lock(
    State(state): State<GatewayState>,
    Path(session_id): Path<String>,
    Query(query): Query<ReleaseLockQuery>,
) -> Result<Response, ApiError> {
    let Some(holder) = query.holder else {
        state.locks.release_lock(&session_id).await?;
        info!(session_id = %session_id, "session lock released by operator");
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    if state.locks.release_lock_held_by(&session_id, &holder).await? {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    match state.locks.get_active_message(&session_id).await? {
        None => Ok(StatusCode::NO_CONTENT.into_response()),
        Some(active_message_id) => Ok((
            StatusCode::CONFLICT,
            Json(SessionLockedResponse {
                error: "session locked by another holder".to_string(),
                session_id,
                active_message_id: Some(active_message_id),
            }),
        )
            .into_response()),
    }
}

/// GET /v1/locks
pub async fn get_locks(
    State(state): State<GatewayState>,
) -> Result<Json<LockListResponse>, ApiError> {
    let locks = state.locks.list_active_locks().await?;
    Ok(Json(LockListResponse { locks }))
}

/// GET /v1/queue/stats
pub async fn get_queue_stats(
    State(state): State<GatewayState>,
) -> Result<Json<QueueStatsResponse>, ApiError> {
    let stats = state.queue.get_queue_stats().await?;
    Ok(Json(QueueStatsResponse {
        total: stats.total(),
        stats,
    }))
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Response {
    let (status_code, status) = match state.queue.health_check().await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "ok"),
        Ok(HealthStatus::Degraded(reason)) => {
            warn!(reason = %reason, "storage degraded");
            (StatusCode::OK, "degraded")
        }
        Ok(HealthStatus::Unhealthy(reason)) => {
            warn!(reason = %reason, "storage unhealthy");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
        Err(e) => {
            warn!(error = %e, "storage health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.health.start_time.elapsed().as_secs(),
        }),
    )
        .into_response()
}
