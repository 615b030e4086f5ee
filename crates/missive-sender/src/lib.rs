// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outgoing delivery for the Missive pipeline.
//!
//! - [`queue`]: per-conversation serial job queues with retry and crash recovery
//! - [`gate`]: conversation holds for identity verification and rate limit challenges
//! - [`handlers`]: one send handler per job kind
//! - [`resolver`]: decides who a send goes to
//! - [`classifier`]: turns channel errors into retry, drop or fail decisions
//! - [`pending`]: the pending-message cache used for crash recovery

pub mod bundle;
pub mod classifier;
pub mod gate;
pub mod handlers;
pub mod metrics;
pub mod pending;
pub mod queue;
pub mod resolver;

pub use bundle::JobBundle;
pub use classifier::{classify, Action, Classification, FailureReason, SideEffect};
pub use gate::{ConversationGates, Hold};
pub use handlers::{HandlerOutcome, SenderContext};
pub use pending::PendingMessageCache;
pub use queue::{JobHandle, OutgoingQueues, QueueSettings};
pub use resolver::{resolve, DropReason, RecipientResolution, ResolvedRecipient};
