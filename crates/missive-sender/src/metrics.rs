// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue metric recording helpers.
//!
//! Descriptions are registered once by the engine; these only record.

use missive_core::JobKind;

pub fn record_job_completed(kind: JobKind) {
    metrics::counter!("missive_jobs_completed_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_job_failed(kind: JobKind) {
    metrics::counter!("missive_jobs_failed_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_job_retry(kind: JobKind) {
    metrics::counter!("missive_job_retries_total", "kind" => kind.to_string()).increment(1);
}

/// `reason` is `verification` or `challenge`.
pub fn record_conversation_held(reason: &'static str) {
    metrics::counter!("missive_conversation_holds_total", "reason" => reason).increment(1);
}

/// Time spent inside one secure-channel send.
pub fn record_send_latency(seconds: f64) {
    metrics::histogram!("missive_send_latency_seconds").record(seconds);
}
