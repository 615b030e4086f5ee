// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capped exponential backoff.

use std::time::Duration;

use rand::Rng;

/// Retry delay curve: `initial * multiplier^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Shave up to 20% off each delay so retries from many jobs spread out.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(15 * 60),
            multiplier: 1.9,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic delay before retrying after `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max.as_millis() as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }

    /// Delay before retrying after `attempt`, with jitter when enabled.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.8..=1.0);
        base.mul_f64(factor)
    }

    /// Number of attempts whose cumulative base delays first cover `budget`.
    ///
    /// This is the attempt cap used when none is configured explicitly.
    pub fn max_attempts_within(&self, budget: Duration) -> u32 {
        let mut attempts: u32 = 0;
        let mut total = Duration::ZERO;
        while total < budget && attempts < u32::MAX {
            attempts += 1;
            total += self.base_delay(attempts).max(Duration::from_millis(1));
        }
        attempts.max(1)
    }
}
