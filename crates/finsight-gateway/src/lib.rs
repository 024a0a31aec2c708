// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway over the session lock, the job queue, and the progress
//! broadcaster.
//!
//! Producers submit analyses here (lock, then enqueue), clients follow
//! progress over Server-Sent Events, and operators inspect locks and queue
//! depth. Workers run elsewhere and share only the database and, when
//! embedded in the same process, the broadcaster.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod sse;

pub use auth::AuthConfig;
pub use server::{build_router, start_server, GatewayState, HealthState};
