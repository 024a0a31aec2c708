// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Router tests against a real SQLite store, driven with `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use finsight_bus::ProgressBroadcaster;
use finsight_config::model::{QueueConfig, StorageConfig};
use finsight_core::{JobQueue, SessionLockStore, StorageAdapter};
use finsight_gateway::handlers::{
    LockListResponse, LockStatusResponse, QueueStatsResponse, SessionLockedResponse,
    SubmitAnalysisResponse,
};
use finsight_gateway::{AuthConfig, GatewayState, build_router};
use finsight_storage::SqliteStorage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    store: Arc<SqliteStorage>,
    broadcaster: ProgressBroadcaster,
    state: GatewayState,
    _dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            database_path: dir.path().join("gateway.db").to_str().unwrap().to_string(),
            ..StorageConfig::default()
        };
        let store = Arc::new(SqliteStorage::new(storage, &QueueConfig::default()));
        store.initialize().await.unwrap();
        let broadcaster = ProgressBroadcaster::new();
        let state = GatewayState::new(store.clone(), store.clone(), broadcaster.clone())
            .with_heartbeat(Duration::from_millis(50));
        Self {
            store,
            broadcaster,
            state,
            _dir: dir,
        }
    }

    fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        (status, body.to_vec())
    }

    async fn submit(&self, body: Value) -> (StatusCode, Vec<u8>) {
        self.send(
            Request::post("/v1/analyses")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn submit_locks_session_and_enqueues() {
    let app = TestApp::new().await;

    let (status, body) = app
        .submit(json!({"session_id": "s1", "message_id": "m1", "payload": {"ticker": "NVDA"}}))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: SubmitAnalysisResponse = parse(&body);
    assert_eq!(accepted.session_id, "s1");
    assert_eq!(accepted.message_id, "m1");

    assert_eq!(
        app.store.get_active_message("s1").await.unwrap().as_deref(),
        Some("m1")
    );
    let job = app.store.get_job(&accepted.job_id).await.unwrap().unwrap();
    assert_eq!(job.payload, json!({"ticker": "NVDA"}));
}

#[tokio::test]
async fn submit_to_busy_session_is_409_and_enqueues_nothing() {
    let app = TestApp::new().await;
    app.submit(json!({"session_id": "s1", "message_id": "m1"})).await;

    let (status, body) = app
        .submit(json!({"session_id": "s1", "message_id": "m2"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let locked: SessionLockedResponse = parse(&body);
    assert_eq!(locked.error, "session locked");
    assert_eq!(locked.active_message_id.as_deref(), Some("m1"));

    assert_eq!(app.store.get_queue_stats().await.unwrap().total(), 1);
}

#[tokio::test]
async fn submit_generates_message_id_when_absent() {
    let app = TestApp::new().await;
    let (status, body) = app.submit(json!({"session_id": "s1"})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: SubmitAnalysisResponse = parse(&body);
    assert!(!accepted.message_id.is_empty());
}

#[tokio::test]
async fn submit_with_blank_session_is_400() {
    let app = TestApp::new().await;
    let (status, _) = app.submit(json!({"session_id": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_analysis_returns_job_or_404() {
    let app = TestApp::new().await;
    let (_, body) = app.submit(json!({"session_id": "s1"})).await;
    let accepted: SubmitAnalysisResponse = parse(&body);

    let (status, body) = app.get(&format!("/v1/analyses/{}", accepted.job_id)).await;
    assert_eq!(status, StatusCode::OK);
    let job: Value = parse(&body);
    assert_eq!(job["status"], "pending");
    assert_eq!(job["attempt_count"], 0);
    assert!(job["worker_id"].is_null());

    let (status, _) = app.get("/v1/analyses/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lock_status_and_listing() {
    let app = TestApp::new().await;
    app.submit(json!({"session_id": "s1", "message_id": "m1"})).await;

    let (status, body) = app.get("/v1/sessions/s1/lock").await;
    assert_eq!(status, StatusCode::OK);
    let lock: LockStatusResponse = parse(&body);
    assert!(lock.locked);
    assert_eq!(lock.active_message_id.as_deref(), Some("m1"));

    let (_, body) = app.get("/v1/sessions/other/lock").await;
    let lock: LockStatusResponse = parse(&body);
    assert!(!lock.locked);

    let (_, body) = app.get("/v1/locks").await;
    let list: LockListResponse = parse(&body);
    assert_eq!(list.locks.len(), 1);
    assert_eq!(list.locks[0].session_id, "s1");
}

#[tokio::test]
async fn release_lock_checks_holder_when_given() {
    let app = TestApp::new().await;
    app.submit(json!({"session_id": "s1", "message_id": "m1"})).await;

    let delete = |uri: &str| Request::delete(uri).body(Body::empty()).unwrap();

    let (status, _) = app.send(delete("/v1/sessions/s1/lock?holder=m2")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(app.store.is_session_locked("s1").await.unwrap());

    let (status, _) = app.send(delete("/v1/sessions/s1/lock?holder=m1")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!app.store.is_session_locked("s1").await.unwrap());

    let (status, _) = app.send(delete("/v1/sessions/s1/lock")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn queue_stats_include_total() {
    let app = TestApp::new().await;
    app.submit(json!({"session_id": "s1"})).await;
    app.submit(json!({"session_id": "s2"})).await;

    let (status, body) = app.get("/v1/queue/stats").await;
    assert_eq!(status, StatusCode::OK);
    let stats: QueueStatsResponse = parse(&body);
    assert_eq!(stats.stats.pending, 2);
    assert_eq!(stats.total, 2);
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = parse(&body);
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn bearer_token_guards_api_but_not_health() {
    let app = TestApp::new().await;
    let router = build_router(app.state.clone().with_auth(AuthConfig {
        bearer_token: Some("s3cret".to_string()),
    }));

    let response = router
        .clone()
        .oneshot(Request::get("/v1/locks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .clone()
        .oneshot(
            Request::get("/v1/locks")
                .header(header::AUTHORIZATION, "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn event_stream_forwards_progress_and_heartbeats() {
    let app = TestApp::new().await;
    let response = app
        .router()
        .oneshot(
            Request::get("/v1/sessions/s1/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(app.broadcaster.subscriber_count("s1"), 1);

    app.broadcaster.info("s1", "pulling 10-Q filings").await;

    let mut body = response.into_body().into_data_stream();
    let frame = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert!(text.starts_with("data: "));
    assert!(text.ends_with("\n\n"));
    let event: Value = serde_json::from_str(text["data: ".len()..].trim()).unwrap();
    assert_eq!(event["message"], "pulling 10-Q filings");
    assert_eq!(event["level"], "info");

    let frame = body.next().await.unwrap().unwrap();
    assert_eq!(&frame[..], b"data: {\"type\":\"heartbeat\"}\n\n");

    drop(body);
    assert_eq!(app.broadcaster.subscriber_count("s1"), 0);
}

#[tokio::test]
async fn shutdown_ends_event_streams() {
    let app = TestApp::new().await;
    let response = app
        .router()
        .oneshot(
            Request::get("/v1/sessions/s1/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    app.state.shutdown.cancel();
    let body = tokio::time::timeout(
        Duration::from_secs(5),
        to_bytes(response.into_body(), 1 << 20),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(body.is_empty() || body.starts_with(b"data: "));
}
