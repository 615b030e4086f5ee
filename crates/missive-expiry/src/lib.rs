// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Disappearing-message expiry for the Missive delivery pipeline.
//!
//! A message expires `expire_timer_ms` after its expiration start. The
//! [`ExpirationScheduler`] keeps one timer aimed at the soonest deadline and
//! deletes messages as they come due.

pub mod delay;
pub mod scheduler;

pub use delay::next_wake_delay;
pub use scheduler::ExpirationScheduler;
