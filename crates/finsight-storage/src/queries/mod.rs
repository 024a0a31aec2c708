// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the lock table and the job queue.

pub mod jobs;
pub mod locks;
