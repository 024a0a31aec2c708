// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions for the persistent store.
//!
//! Every trait uses `#[async_trait]` so callers can hold `Arc<dyn ...>`
//! handles and the backend stays swappable.

pub mod lock;
pub mod queue;
pub mod storage;

pub use lock::SessionLockStore;
pub use queue::JobQueue;
pub use storage::StorageAdapter;
