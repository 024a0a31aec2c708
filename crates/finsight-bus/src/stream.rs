// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming view of a session's progress with idle heartbeats.

use std::time::Duration;

use finsight_core::ProgressEvent;
use futures::stream::{self, Stream};

use crate::broadcaster::ProgressBroadcaster;

/// Idle window after which a heartbeat frame is produced.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);

/// One item of a progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressFrame {
    Event(ProgressEvent),
    /// Synthetic keep-alive produced after a silent idle window.
    Heartbeat,
}

impl ProgressFrame {
    /// Wire form: the event object, or `{"type":"heartbeat"}`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            ProgressFrame::Event(event) => serde_json::to_string(event),
            ProgressFrame::Heartbeat => Ok(r#"{"type":"heartbeat"}"#.to_string()),
        }
    }
}

/// Subscribe to `session_id` and yield each delivered event, or a
/// heartbeat whenever `heartbeat` passes without one.
///
/// The subscription lives inside the stream, so dropping the stream (for
/// example when an HTTP client disconnects) unsubscribes. The stream ends
/// if the session is cleared out from under it.
pub fn progress_stream(
    broadcaster: &ProgressBroadcaster,
    session_id: &str,
    heartbeat: Duration,
) -> impl Stream<Item = ProgressFrame> + Send + 'static + use<> {
    let (subscription, rx) = broadcaster.subscribe_channel(session_id);

    stream::unfold((subscription, rx), move |(subscription, mut rx)| async move {
        match tokio::time::timeout(heartbeat, rx.recv()).await {
            Ok(Some(event)) => Some((ProgressFrame::Event(event), (subscription, rx))),
            Ok(None) => None,
            Err(_) => Some((ProgressFrame::Heartbeat, (subscription, rx))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn silence_produces_heartbeats() {
        let bus = ProgressBroadcaster::new();
        let mut stream = Box::pin(progress_stream(&bus, "s", DEFAULT_HEARTBEAT));

        let started = tokio::time::Instant::now();
        assert_eq!(stream.next().await, Some(ProgressFrame::Heartbeat));
        assert!(started.elapsed() >= DEFAULT_HEARTBEAT);
        assert_eq!(stream.next().await, Some(ProgressFrame::Heartbeat));
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_forwarded_before_heartbeat() {
        let bus = ProgressBroadcaster::new();
        let mut stream = Box::pin(progress_stream(&bus, "s", DEFAULT_HEARTBEAT));

        bus.info("s", "loading filings").await;
        match stream.next().await {
            Some(ProgressFrame::Event(event)) => assert_eq!(event.message, "loading filings"),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let bus = ProgressBroadcaster::new();
        let stream = progress_stream(&bus, "s", DEFAULT_HEARTBEAT);
        assert_eq!(bus.subscriber_count("s"), 1);
        drop(stream);
        assert_eq!(bus.subscriber_count("s"), 0);
    }

    #[tokio::test]
    async fn cleared_session_ends_stream() {
        let bus = ProgressBroadcaster::new();
        let mut stream = Box::pin(progress_stream(&bus, "s", DEFAULT_HEARTBEAT));
        bus.clear("s");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn frame_wire_forms() {
        assert_eq!(
            ProgressFrame::Heartbeat.to_json().unwrap(),
            r#"{"type":"heartbeat"}"#
        );

        let event = ProgressEvent {
            id: "1-0".into(),
            timestamp: "2026-01-01T00:00:00.000Z".into(),
            level: finsight_core::ProgressLevel::Info,
            message: "step".into(),
            step: Some(1),
            total_steps: Some(3),
            details: serde_json::json!({}),
        };
        let json: serde_json::Value =
            serde_json::from_str(&ProgressFrame::Event(event).to_json().unwrap()).unwrap();
        assert_eq!(json["totalSteps"], 3);
        assert_eq!(json["level"], "info");
        assert_eq!(json["details"], serde_json::json!({}));
    }
}
