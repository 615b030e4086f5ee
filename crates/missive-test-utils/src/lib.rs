// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Missive integration tests.
//!
//! Provides a scripted secure channel and test harness infrastructure for
//! fast, deterministic, CI-runnable tests without a network.
//!
//! # Components
//!
//! - [`MockSecureChannel`] - Mock secure channel with scripted results and request capture
//! - [`TestHarness`] - Temp SQLite storage, bus, and seeding helpers

pub mod harness;
pub mod mock_channel;

pub use harness::{next_matching, TestHarness, TestHarnessBuilder};
pub use mock_channel::MockSecureChannel;
