// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session-keyed fan-out of [`ProgressEvent`]s.
//!
//! Emits for one session are serialized by a per-session async mutex, so
//! every subscriber sees that session's events in emission order. Fan-out
//! walks a snapshot of the subscriber list, which lets callbacks (or other
//! tasks) subscribe and unsubscribe while an emit is in flight.
//!
//! A session's emit lock lives only while the session has subscribers or an
//! emit in flight, so per-session state does not grow with the number of
//! sessions ever seen.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use finsight_core::time::format_timestamp;
use finsight_core::{ProgressEvent, ProgressLevel};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

/// What a subscriber callback returns. Errors are logged and otherwise ignored.
pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A subscriber callback, invoked synchronously once per delivered event.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) -> CallbackResult + Send + Sync>;

struct Registration {
    id: u64,
    callback: ProgressCallback,
}

#[derive(Default)]
struct Inner {
    subscribers: DashMap<String, Vec<Registration>>,
    emit_locks: DashMap<String, Arc<Mutex<()>>>,
    next_subscriber: AtomicU64,
    next_event: AtomicU64,
}

impl Inner {
    fn remove_subscriber(&self, session_id: &str, id: u64) -> bool {
        let removed = match self.subscribers.get_mut(session_id) {
            Some(mut regs) => {
                let before = regs.len();
                regs.retain(|r| r.id != id);
                regs.len() != before
            }
            None => false,
        };
        if self
            .subscribers
            .remove_if(session_id, |_, regs| regs.is_empty())
            .is_some()
        {
            self.release_emit_lock(session_id);
        }
        removed
    }

    /// Drop the session's emit lock unless an emit holds it or the session
    /// still has subscribers. The map's own reference is the only one when
    /// the lock is idle.
    fn release_emit_lock(&self, session_id: &str) {
        self.emit_locks.remove_if(session_id, |_, lock| {
            Arc::strong_count(lock) == 1 && !self.subscribers.contains_key(session_id)
        });
    }
}

/// The content of an event before the broadcaster stamps it with an id and
/// timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub level: ProgressLevel,
    pub message: String,
    pub step: Option<u32>,
    pub total_steps: Option<u32>,
    pub details: Option<serde_json::Value>,
}

impl ProgressUpdate {
    pub fn new(level: ProgressLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            step: None,
            total_steps: None,
            details: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ProgressLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ProgressLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ProgressLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ProgressLevel::Error, message)
    }

    /// Attach `step` of `total_steps`.
    pub fn with_step(mut self, step: u32, total_steps: u32) -> Self {
        self.step = Some(step);
        self.total_steps = Some(total_steps);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// In-memory pub/sub hub for progress events.
///
/// Construct one per process and share it by cloning; clones refer to the
/// same subscriber registry.
#[derive(Clone, Default)]
pub struct ProgressBroadcaster {
    inner: Arc<Inner>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every event emitted on `session_id` until the
    /// returned [`Subscription`] is unsubscribed or dropped.
    pub fn subscribe<F>(&self, session_id: &str, callback: F) -> Subscription
    where
        F: Fn(&ProgressEvent) -> CallbackResult + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(session_id.to_string())
            .or_default()
            .push(Registration {
                id,
                callback: Arc::new(callback),
            });
        debug!(session_id, subscriber = id, "progress subscriber registered");

        Subscription {
            inner: Arc::clone(&self.inner),
            session_id: session_id.to_string(),
            id: Some(id),
        }
    }

    /// Subscribe with a channel instead of a callback. Events arrive on the
    /// receiver in emission order.
    pub fn subscribe_channel(
        &self,
        session_id: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(session_id, move |event| {
            tx.send(event.clone())
                .map_err(|_| "progress receiver dropped".into())
        });
        (subscription, rx)
    }

    /// Build an event and deliver it to every current subscriber of
    /// `session_id`. With no subscribers the event is discarded.
    ///
    /// Subscriber failures (errors or panics) are logged and never reach
    /// the caller.
    pub async fn emit(&self, session_id: &str, update: ProgressUpdate) -> ProgressEvent {
        let event = self.stamp(update);

        let lock = Arc::clone(
            self.inner
                .emit_locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        {
            let _guard = lock.lock().await;
            self.deliver(session_id, &event);
        }
        drop(lock);
        self.inner.release_emit_lock(session_id);
        event
    }

    /// Fan `event` out to a snapshot of the session's subscribers.
    fn deliver(&self, session_id: &str, event: &ProgressEvent) {
        let snapshot: Vec<(u64, ProgressCallback)> = self
            .inner
            .subscribers
            .get(session_id)
            .map(|regs| {
                regs.iter()
                    .map(|r| (r.id, Arc::clone(&r.callback)))
                    .collect()
            })
            .unwrap_or_default();

        if snapshot.is_empty() {
            trace!(session_id, event_id = %event.id, "no subscribers, event dropped");
            return;
        }

        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    session_id,
                    subscriber = id,
                    error = %e,
                    "progress subscriber callback failed"
                ),
                Err(_) => warn!(
                    session_id,
                    subscriber = id,
                    "progress subscriber callback panicked"
                ),
            }
        }
    }

    pub async fn info(&self, session_id: &str, message: impl Into<String>) -> ProgressEvent {
        self.emit(session_id, ProgressUpdate::info(message)).await
    }

    pub async fn success(&self, session_id: &str, message: impl Into<String>) -> ProgressEvent {
        self.emit(session_id, ProgressUpdate::success(message)).await
    }

    pub async fn warning(&self, session_id: &str, message: impl Into<String>) -> ProgressEvent {
        self.emit(session_id, ProgressUpdate::warning(message)).await
    }

    pub async fn error(&self, session_id: &str, message: impl Into<String>) -> ProgressEvent {
        self.emit(session_id, ProgressUpdate::error(message)).await
    }

    /// Always empty: the broadcaster keeps no history.
    pub fn get_events(&self, _session_id: &str) -> Vec<ProgressEvent> {
        Vec::new()
    }

    /// Drop all subscribers and the emit lock for `session_id`.
    ///
    /// Outstanding [`Subscription`]s for the session become inert. An emit
    /// lock that is currently held stays in place so emits already queued
    /// on it keep their order; the last of them removes it.
    pub fn clear(&self, session_id: &str) {
        let dropped = self
            .inner
            .subscribers
            .remove(session_id)
            .map(|(_, regs)| regs.len())
            .unwrap_or(0);
        self.inner.release_emit_lock(session_id);
        debug!(session_id, dropped, "progress session cleared");
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.inner
            .subscribers
            .get(session_id)
            .map(|regs| regs.len())
            .unwrap_or(0)
    }

    /// Sessions that currently hold per-session state.
    pub fn session_count(&self) -> usize {
        let mut sessions: Vec<String> = self
            .inner
            .subscribers
            .iter()
            .map(|e| e.key().clone())
            .collect();
        sessions.extend(self.inner.emit_locks.iter().map(|e| e.key().clone()));
        sessions.sort();
        sessions.dedup();
        sessions.len()
    }

    fn stamp(&self, update: ProgressUpdate) -> ProgressEvent {
        let now = Utc::now();
        let seq = self.inner.next_event.fetch_add(1, Ordering::Relaxed);
        ProgressEvent {
            id: format!("{}-{seq}", now.timestamp_millis()),
            timestamp: format_timestamp(now),
            level: update.level,
            message: update.message,
            step: update.step,
            total_steps: update.total_steps,
            details: update
                .details
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
        }
    }
}

/// Handle for one subscriber registration.
///
/// Unsubscribing is idempotent, and dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    inner: Arc<Inner>,
    session_id: String,
    id: Option<u64>,
}

impl Subscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Remove the registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self) -> bool {
        match self.id.take() {
            Some(id) => {
                let removed = self.inner.remove_subscriber(&self.session_id, id);
                debug!(session_id = %self.session_id, subscriber = id, "progress subscriber removed");
                removed
            }
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("session_id", &self.session_id)
            .field("id", &self.id)
            .finish()
    }
}
