// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the job queue, pending records, messages, and conversations.

pub mod conversations;
pub mod jobs;
pub mod messages;
pub mod pending;
