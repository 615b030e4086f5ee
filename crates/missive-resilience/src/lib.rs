// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for the Missive delivery pipeline.
//!
//! - [`dedup::TaskDeduplicator`]: at most one in-flight execution of a named
//!   task, with reference-counted cooperative cancellation.
//! - [`backoff::BackoffPolicy`]: capped exponential retry delays.

pub mod backoff;
pub mod dedup;

pub use backoff::BackoffPolicy;
pub use dedup::{DedupError, TaskDeduplicator};
