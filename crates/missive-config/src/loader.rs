// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./missive.toml` > `~/.config/missive/missive.toml` > `/etc/missive/missive.toml`
//! with environment variable overrides via `MISSIVE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::MissiveConfig;

/// Top-level sections, used to split env var names into `section.key`.
const SECTIONS: &[&str] = &["client", "storage", "queue", "receipts", "expiry"];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/missive/missive.toml` (system-wide)
/// 3. `~/.config/missive/missive.toml` (user XDG config)
/// 4. `./missive.toml` (local directory)
/// 5. `MISSIVE_*` environment variables
pub fn load_config() -> Result<MissiveConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env vars).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<MissiveConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MissiveConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<MissiveConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MissiveConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(MissiveConfig::default()))
        .merge(Toml::file("/etc/missive/missive.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("missive/missive.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("missive.toml"))
        .merge(env_provider())
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `MISSIVE_QUEUE_MAX_RETRY_TIME_SECS` must map to
/// `queue.max_retry_time_secs`, not `queue.max.retry.time.secs`.
fn env_provider() -> Env {
    Env::prefixed("MISSIVE_").map(|key| map_env_key(key.as_str()).into())
}

/// Map a lowercased, prefix-stripped env var name to a dotted config path.
///
/// Only the leading section name is split off; unknown sections pass through
/// unchanged and are then rejected by `deny_unknown_fields`.
pub fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
