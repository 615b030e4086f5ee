// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Requests to and results from the secure channel.

use std::time::Duration;

use thiserror::Error;

use crate::job::OutgoingReceiptKind;
use crate::types::{ConversationId, MessageId, ServiceId, Timestamp};

/// Content handed to the secure channel. The core never looks inside the
/// byte payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingContent {
    Message {
        message_id: MessageId,
        body: Vec<u8>,
    },
    Receipts {
        kind: OutgoingReceiptKind,
        timestamps: Vec<Timestamp>,
    },
    SavedProto {
        content: Vec<u8>,
    },
    Attachment {
        message_id: MessageId,
        attachment_id: String,
    },
    PollVote {
        target_message_id: MessageId,
        target_author: ServiceId,
        target_sent_at: Timestamp,
        option_indexes: Vec<u32>,
    },
    Null,
}

/// One send attempt to a set of resolved addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub conversation_id: ConversationId,
    pub recipients: Vec<ServiceId>,
    pub content: OutgoingContent,
    pub timestamp: Timestamp,
    pub urgent: bool,
}

/// Successful send outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub succeeded: Vec<ServiceId>,
}

/// A failure attributed to a single recipient inside an aggregate error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientFailure {
    pub recipient: ServiceId,
    pub error: SendError,
}

/// Errors raised by the secure channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("identity key changed for {0}")]
    IdentityKeyChanged(ServiceId),

    #[error("recipient {0} is not registered")]
    Unregistered(ServiceId),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server busy")]
    ServerBusy { retry_after: Option<Duration> },

    /// The server wants a challenge solved before it takes more sends.
    /// `retry_after`, when set, is when the challenge lapses on its own.
    #[error("rate limit challenge required")]
    Challenge {
        token: String,
        retry_after: Option<Duration>,
    },

    #[error("payload too large ({size} bytes)")]
    PayloadTooLarge { size: usize },

    #[error("malformed content: {0}")]
    MalformedContent(String),

    /// Some recipients failed. `succeeded` lists the ones that did not.
    #[error("{} recipient(s) failed, {} succeeded", failures.len(), succeeded.len())]
    Partial {
        succeeded: Vec<ServiceId>,
        failures: Vec<RecipientFailure>,
    },
}
