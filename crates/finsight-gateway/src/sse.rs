// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-Sent Events stream of a session's progress.
//!
//! Each frame is a bare `data:` line:
//! ```text
//! data: {"id":"1767225600000-7","level":"info","message":"fetching prices",...}
//!
//! data: {"type":"heartbeat"}
//! ```
//!
//! The subscription is dropped with the response body, so a client
//! disconnect unsubscribes.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use finsight_bus::{ProgressFrame, progress_stream};
use futures::stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::server::GatewayState;

/// GET /v1/sessions/{session_id}/events
pub async fn stream_session_events(
    State(state): State<GatewayState>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(session_id = %session_id, "progress stream opened");

    let frames = progress_stream(&state.broadcaster, &session_id, state.heartbeat)
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(|frame| Ok(Event::default().data(frame_data(&frame))));

    Sse::new(frames)
}

fn frame_data(frame: &ProgressFrame) -> String {
    frame.to_json().unwrap_or_else(|e| {
        warn!(error = %e, "failed to serialize progress frame");
        r#"{"type":"error"}"#.to_string()
    })
}
