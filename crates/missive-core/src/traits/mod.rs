// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits the pipeline is written against.

pub mod channel;
pub mod observer;
pub mod storage;

pub use channel::SecureChannel;
pub use observer::MessageObserver;
pub use storage::{ConversationStore, JobStore, MessageStore, Storage};
