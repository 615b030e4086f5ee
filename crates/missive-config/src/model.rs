// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Missive delivery pipeline.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest delay accepted by the platform timer (2^31 - 1 milliseconds).
pub const MAX_TIMER_DELAY_MS: u64 = 2_147_483_647;

/// Top-level Missive configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MissiveConfig {
    /// Process-level settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Outgoing job queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Receipt reconciliation settings.
    #[serde(default)]
    pub receipts: ReceiptsConfig,

    /// Disappearing-message sweep settings.
    #[serde(default)]
    pub expiry: ExpiryConfig,
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("missive").join("missive.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("missive.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Outgoing job queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// How many conversations may have a job running at the same time.
    #[serde(default = "default_max_concurrent_conversations")]
    pub max_concurrent_conversations: usize,

    /// A job stops retrying once this long has passed since it was created.
    #[serde(default = "default_max_retry_time_secs")]
    pub max_retry_time_secs: u64,

    /// Attempt cap. Derived from `max_retry_time_secs` and the backoff curve
    /// when unset.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Delay before the second attempt.
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Upper bound for a single backoff delay.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Spread delays randomly by up to 20% to avoid retry stampedes.
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: bool,

    /// How long shutdown waits for running jobs.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl QueueConfig {
    pub fn max_retry_time(&self) -> Duration {
        Duration::from_secs(self.max_retry_time_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_conversations: default_max_concurrent_conversations(),
            max_retry_time_secs: default_max_retry_time_secs(),
            max_attempts: None,
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_jitter: default_backoff_jitter(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_max_concurrent_conversations() -> usize {
    8
}

fn default_max_retry_time_secs() -> u64 {
    24 * 60 * 60
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    15 * 60 * 1_000
}

fn default_backoff_multiplier() -> f64 {
    1.9
}

fn default_backoff_jitter() -> bool {
    true
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Receipt reconciliation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiptsConfig {
    /// Apply read and view receipts from other people. When off, they are
    /// ignored.
    #[serde(default = "default_read_receipts")]
    pub read_receipts: bool,
}

impl Default for ReceiptsConfig {
    fn default() -> Self {
        Self {
            read_receipts: default_read_receipts(),
        }
    }
}

fn default_read_receipts() -> bool {
    true
}

/// Disappearing-message sweep configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExpiryConfig {
    /// Coalescing window for "something changed" triggers.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Longest single timer the scheduler arms.
    #[serde(default = "default_max_timer_delay_ms")]
    pub max_timer_delay_ms: u64,
}

impl ExpiryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_timer_delay(&self) -> Duration {
        Duration::from_millis(self.max_timer_delay_ms)
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_timer_delay_ms: default_max_timer_delay_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    1_000
}

fn default_max_timer_delay_ms() -> u64 {
    MAX_TIMER_DELAY_MS
}
