// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-attempt context handed to job handlers.

use std::time::Duration;

use missive_core::{Job, Timestamp};
use tracing::Span;

/// What a handler knows about the attempt it is running.
#[derive(Debug, Clone)]
pub struct JobBundle {
    /// 1-based attempt number.
    pub attempt: u32,
    pub is_final_attempt: bool,
    /// False once the job's retry window has closed. Handlers check this
    /// before doing expensive work.
    pub should_continue: bool,
    pub time_remaining: Duration,
    /// Send timestamp shared by every attempt of the job, so recipients
    /// can dedupe resends and match receipts against it.
    pub timestamp: Timestamp,
    /// When this attempt started. Used for local bookkeeping only.
    pub started_at: Timestamp,
    /// Carries `job_id`, `kind`, `conversation_id` and `attempt`.
    pub span: Span,
}

impl JobBundle {
    pub fn for_attempt(
        job: &Job,
        attempt: u32,
        max_attempts: u32,
        max_retry_time: Duration,
        now: Timestamp,
    ) -> Self {
        let deadline = job.created_at.saturating_add(duration_ms(max_retry_time));
        let remaining_ms = deadline.saturating_sub(now);
        Self {
            attempt,
            is_final_attempt: attempt >= max_attempts,
            should_continue: remaining_ms > 0,
            time_remaining: Duration::from_millis(remaining_ms.max(0) as u64),
            timestamp: job.created_at,
            started_at: now,
            span: job_span(job, attempt),
        }
    }
}

pub(crate) fn job_span(job: &Job, attempt: u32) -> Span {
    tracing::info_span!(
        "job",
        job_id = %job.id,
        kind = %job.kind(),
        conversation_id = %job.conversation_id,
        attempt,
    )
}

pub(crate) fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
