// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as non-empty paths, positive limits, and a consistent backoff curve.

use crate::diagnostic::ConfigError;
use crate::model::{MissiveConfig, MAX_TIMER_DELAY_MS};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &MissiveConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.client.log_level.as_str()) {
        fail(format!(
            "client.log_level `{}` must be one of: {}",
            config.client.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let queue = &config.queue;
    if queue.max_concurrent_conversations == 0 {
        fail("queue.max_concurrent_conversations must be at least 1".to_string());
    }
    if queue.max_retry_time_secs == 0 {
        fail("queue.max_retry_time_secs must be greater than 0".to_string());
    }
    if queue.max_attempts == Some(0) {
        fail("queue.max_attempts must be at least 1 when set".to_string());
    }
    if queue.backoff_initial_ms == 0 {
        fail("queue.backoff_initial_ms must be greater than 0".to_string());
    }
    if queue.backoff_initial_ms > queue.backoff_max_ms {
        fail(format!(
            "queue.backoff_initial_ms ({}) must not exceed queue.backoff_max_ms ({})",
            queue.backoff_initial_ms, queue.backoff_max_ms
        ));
    }
    if !queue.backoff_multiplier.is_finite() || queue.backoff_multiplier < 1.0 {
        fail(format!(
            "queue.backoff_multiplier must be a finite number >= 1.0, got {}",
            queue.backoff_multiplier
        ));
    }

    let expiry = &config.expiry;
    if expiry.max_timer_delay_ms == 0 || expiry.max_timer_delay_ms > MAX_TIMER_DELAY_MS {
        fail(format!(
            "expiry.max_timer_delay_ms must be between 1 and {MAX_TIMER_DELAY_MS}, got {}",
            expiry.max_timer_delay_ms
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
