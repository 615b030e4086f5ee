// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notification payloads carried on the bus.

use chrono::{DateTime, Utc};
use missive_core::{ConversationId, JobId, JobKind, MessageId, ServiceId, Timestamp};
use serde::Serialize;

/// Envelope stamped by [`crate::EventBus::publish`].
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub id: String,
    pub at: DateTime<Utc>,
    pub notification: Notification,
}

impl BusEvent {
    pub fn new(notification: Notification) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            at: Utc::now(),
            notification,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A message went out to at least one recipient.
    MessageSent {
        message_id: MessageId,
        conversation_id: ConversationId,
        recipients: Vec<ConversationId>,
    },
    MessageDelivered {
        message_id: MessageId,
        conversation_id: ConversationId,
        from: ServiceId,
        delivered_count: usize,
    },
    MessageRead {
        message_id: MessageId,
        conversation_id: ConversationId,
        from: ServiceId,
        read_count: usize,
    },
    /// A recipient opened view-once or story media.
    MessageViewed {
        message_id: MessageId,
        conversation_id: ConversationId,
        from: ServiceId,
        viewed_count: usize,
    },
    /// Incoming messages were read on a linked device.
    ConversationRead {
        conversation_id: ConversationId,
        read_count: usize,
        read_at: Timestamp,
    },
    MessageExpired {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    ExpirationStarted {
        message_id: MessageId,
        expires_at: Timestamp,
    },
    JobFailed {
        job_id: JobId,
        conversation_id: ConversationId,
        kind: JobKind,
        reason: String,
    },
    /// A recipient's identity key changed and needs user approval.
    VerificationRequired {
        conversation_id: ConversationId,
        service_id: ServiceId,
    },
    RecipientUnregistered {
        conversation_id: ConversationId,
        service_id: ServiceId,
    },
    /// Sends in the conversation are held until the rate limit challenge
    /// named by `token` is solved.
    ChallengeRequired {
        conversation_id: ConversationId,
        token: String,
    },
}

impl Notification {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::MessageSent { .. } => "message_sent",
            Notification::MessageDelivered { .. } => "message_delivered",
            Notification::MessageRead { .. } => "message_read",
            Notification::MessageViewed { .. } => "message_viewed",
            Notification::ConversationRead { .. } => "conversation_read",
            Notification::MessageExpired { .. } => "message_expired",
            Notification::ExpirationStarted { .. } => "expiration_started",
            Notification::JobFailed { .. } => "job_failed",
            Notification::VerificationRequired { .. } => "verification_required",
            Notification::RecipientUnregistered { .. } => "recipient_unregistered",
            Notification::ChallengeRequired { .. } => "challenge_required",
        }
    }
}
