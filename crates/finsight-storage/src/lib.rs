// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Finsight coordination layer.
//!
//! Holds the per-session lock table and the analysis job queue. Every
//! state transition that must be exclusive across processes is a single
//! conditional statement or an `IMMEDIATE` transaction, so the database
//! file is the only arbiter of mutual exclusion.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod queries;

pub use adapter::SqliteStorage;
pub use database::Database;
