// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Precedence, lowest first: compiled defaults, `/etc/finsight/finsight.toml`,
//! `~/.config/finsight/finsight.toml`, `./finsight.toml`, `FINSIGHT_*` env vars.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::FinsightConfig;

/// File name looked up in the working directory and the XDG config dir.
pub const LOCAL_CONFIG_FILE: &str = "finsight.toml";

/// System-wide config file.
pub const SYSTEM_CONFIG_FILE: &str = "/etc/finsight/finsight.toml";

/// Config sections addressable from `FINSIGHT_<SECTION>_<KEY>` env vars.
const ENV_SECTIONS: &[&str] = &["service", "storage", "lock", "queue", "worker", "gateway"];

/// Load configuration from the standard XDG hierarchy with env var overrides.
pub fn load_config() -> Result<FinsightConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no files, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<FinsightConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FinsightConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FinsightConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FinsightConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The Figment used for the standard lookup, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(FinsightConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_FILE))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("finsight").join(LOCAL_CONFIG_FILE))
                .unwrap_or_default(),
        ))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// Maps `FINSIGHT_QUEUE_LEASE_SECS` to `queue.lease_secs`.
///
/// Only the first underscore after a known section becomes a dot, so keys
/// containing underscores survive intact.
fn env_provider() -> Env {
    Env::prefixed("FINSIGHT_").map(|key| map_env_key(key.as_str()).into())
}

pub(crate) fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_section_dot_key() {
        assert_eq!(map_env_key("queue_lease_secs"), "queue.lease_secs");
        assert_eq!(map_env_key("lock_default_ttl_secs"), "lock.default_ttl_secs");
        assert_eq!(map_env_key("gateway_bearer_token"), "gateway.bearer_token");
        assert_eq!(map_env_key("storage_database_path"), "storage.database_path");
    }

    #[test]
    fn unknown_section_is_left_alone() {
        assert_eq!(map_env_key("misc_value"), "misc_value");
    }
}
