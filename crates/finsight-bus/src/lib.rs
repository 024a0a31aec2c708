// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Progress broadcaster for live analysis updates.
//!
//! A process-local publish/subscribe hub keyed by session id. Events are
//! delivered to whoever is subscribed at emit time and then dropped; there
//! is no history and no replay. Durable progress lives on the job record.

pub mod broadcaster;
pub mod stream;

pub use broadcaster::{
    CallbackResult, ProgressBroadcaster, ProgressCallback, ProgressUpdate, Subscription,
};
pub use stream::{progress_stream, ProgressFrame, DEFAULT_HEARTBEAT};
