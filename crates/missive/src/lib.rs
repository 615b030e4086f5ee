// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Missive: outgoing delivery pipeline and receipt reconciliation.
//!
//! The [`Engine`] ties together the per-conversation job queues, the
//! receipt reconciler and the disappearing-message scheduler.

pub mod engine;
pub mod metrics;

pub use engine::Engine;
