// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Catches semantic constraints serde cannot express. All problems are
//! collected rather than failing on the first one.

use crate::diagnostic::ConfigError;
use crate::model::FinsightConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &FinsightConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut invalid = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.service.log_level.as_str()) {
        invalid(format!(
            "service.log_level must be one of {}, got `{}`",
            LOG_LEVELS.join(", "),
            config.service.log_level
        ));
    }

    if !LOG_FORMATS.contains(&config.service.log_format.as_str()) {
        invalid(format!(
            "service.log_format must be one of {}, got `{}`",
            LOG_FORMATS.join(", "),
            config.service.log_format
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        invalid("storage.database_path must not be empty".to_string());
    }

    if config.lock.default_ttl_secs == 0 {
        invalid("lock.default_ttl_secs must be greater than 0".to_string());
    }

    if config.queue.lease_secs == 0 {
        invalid("queue.lease_secs must be greater than 0".to_string());
    }

    if config.queue.max_attempts == 0 {
        invalid("queue.max_attempts must be at least 1".to_string());
    }

    if config.queue.reclaim_interval_secs == 0 {
        invalid("queue.reclaim_interval_secs must be greater than 0".to_string());
    }

    if config.worker.concurrency == 0 {
        invalid("worker.concurrency must be at least 1".to_string());
    }

    if config.worker.poll_interval_ms == 0 {
        invalid("worker.poll_interval_ms must be greater than 0".to_string());
    }

    if let Some(id) = &config.worker.worker_id
        && id.trim().is_empty()
    {
        invalid("worker.worker_id must not be empty when set".to_string());
    }

    if config.worker.command.first().is_some_and(|c| c.trim().is_empty()) {
        invalid("worker.command must start with a program name".to_string());
    }

    if config.gateway.heartbeat_secs == 0 {
        invalid("gateway.heartbeat_secs must be greater than 0".to_string());
    }

    if config.gateway.host.trim().is_empty() {
        invalid("gateway.host must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
