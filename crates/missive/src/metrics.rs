// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric descriptions.
//!
//! Uses the metrics-rs facade; the subsystems record, this only describes.
//! Without an installed recorder every call is a no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Missive metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "missive_jobs_completed_total",
        "Outgoing jobs that finished successfully"
    );
    describe_counter!(
        "missive_jobs_failed_total",
        "Outgoing jobs that failed permanently"
    );
    describe_counter!("missive_job_retries_total", "Outgoing job retries scheduled");
    describe_counter!(
        "missive_conversation_holds_total",
        "Conversations held for identity verification or a rate limit challenge"
    );
    describe_counter!(
        "missive_messages_expired_total",
        "Disappearing messages deleted by the sweeper"
    );
    describe_counter!("missive_receipts_received_total", "Receipts handed to the reconciler");
    describe_counter!("missive_receipts_matched_total", "Receipts applied to a message");
    describe_gauge!(
        "missive_receipts_buffered",
        "Receipts waiting for their message"
    );
    describe_histogram!(
        "missive_send_latency_seconds",
        "Secure channel send latency in seconds"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_without_recorder_is_harmless() {
        register_metrics();
        register_metrics();
    }
}
