// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outgoing jobs, their payloads, and the pending-message record.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::{ConversationId, JobId, MessageId, ServiceId, Timestamp};

/// Discriminant of [`JobPayload`], stored in the `kind` column and used as a
/// metrics label.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    NormalMessage,
    Receipts,
    SavedProto,
    ResendAttachment,
    PollVote,
    NullMessage,
}

/// Which acknowledgement an outgoing receipts job carries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutgoingReceiptKind {
    Delivery,
    Read,
    Viewed,
}

/// One message we are acknowledging to its author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingReceipt {
    /// Direct conversation of the message author.
    pub sender: ConversationId,
    pub message_id: MessageId,
    pub sent_at: Timestamp,
}

/// Type-specific job data. One variant per job kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Text/data message. Content and timestamp live in the pending record.
    NormalMessage {
        message_id: MessageId,
        recipients: Vec<ConversationId>,
    },
    Receipts {
        kind: OutgoingReceiptKind,
        receipts: Vec<OutgoingReceipt>,
    },
    /// Raw content re-sent after a peer reported a decryption error.
    SavedProto {
        content: Vec<u8>,
        timestamp: Timestamp,
        recipients: Vec<ConversationId>,
        urgent: bool,
    },
    ResendAttachment {
        message_id: MessageId,
        attachment_id: String,
        recipients: Vec<ConversationId>,
    },
    PollVote {
        target_message_id: MessageId,
        target_author: ServiceId,
        target_sent_at: Timestamp,
        option_indexes: Vec<u32>,
        recipients: Vec<ConversationId>,
    },
    NullMessage {
        recipient: ConversationId,
        id_for_tracking: Option<String>,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::NormalMessage { .. } => JobKind::NormalMessage,
            JobPayload::Receipts { .. } => JobKind::Receipts,
            JobPayload::SavedProto { .. } => JobKind::SavedProto,
            JobPayload::ResendAttachment { .. } => JobKind::ResendAttachment,
            JobPayload::PollVote { .. } => JobKind::PollVote,
            JobPayload::NullMessage { .. } => JobKind::NullMessage,
        }
    }

    /// The message whose pending record this job owns, if any.
    pub fn pending_message_id(&self) -> Option<&MessageId> {
        match self {
            JobPayload::NormalMessage { message_id, .. } => Some(message_id),
            _ => None,
        }
    }

    /// Recipient conversations this job addresses, in payload order and
    /// without duplicates.
    pub fn recipients(&self) -> Vec<ConversationId> {
        let mut out: Vec<ConversationId> = Vec::new();
        let mut push = |id: &ConversationId| {
            if !out.contains(id) {
                out.push(id.clone());
            }
        };
        match self {
            JobPayload::NormalMessage { recipients, .. }
            | JobPayload::SavedProto { recipients, .. }
            | JobPayload::ResendAttachment { recipients, .. }
            | JobPayload::PollVote { recipients, .. } => recipients.iter().for_each(&mut push),
            JobPayload::Receipts { receipts, .. } => {
                receipts.iter().for_each(|r| push(&r.sender));
            }
            JobPayload::NullMessage { recipient, .. } => push(recipient),
        }
        out
    }

    /// Restrict the payload to the given recipients, in place.
    ///
    /// Used when a retry should only go to the recipients that failed
    /// transiently. A null message has a single recipient and is left as is.
    pub fn narrow_recipients(&mut self, keep: &[ConversationId]) {
        match self {
            JobPayload::NormalMessage { recipients, .. }
            | JobPayload::SavedProto { recipients, .. }
            | JobPayload::ResendAttachment { recipients, .. }
            | JobPayload::PollVote { recipients, .. } => recipients.retain(|r| keep.contains(r)),
            JobPayload::Receipts { receipts, .. } => receipts.retain(|r| keep.contains(&r.sender)),
            JobPayload::NullMessage { .. } => {}
        }
    }
}

/// A unit of outgoing work scoped to one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub conversation_id: ConversationId,
    pub payload: JobPayload,
    pub created_at: Timestamp,
    pub attempts: u32,
    /// Earliest time the next attempt may start.
    pub retry_at: Option<Timestamp>,
}

impl Job {
    /// Create a new job with a fresh id, stamped at `created_at`.
    pub fn new(
        conversation_id: impl Into<ConversationId>,
        payload: JobPayload,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: JobId::generate(),
            conversation_id: conversation_id.into(),
            payload,
            created_at,
            attempts: 0,
            retry_at: None,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

/// Durable record of an in-flight outgoing message, used to resume after a
/// crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub message_id: MessageId,
    pub job_id: JobId,
    pub conversation_id: ConversationId,
    pub recipients: Vec<ConversationId>,
    /// Opaque message content handed to the secure channel.
    pub content: Vec<u8>,
    pub sent_at: Timestamp,
    pub created_at: Timestamp,
}

impl PendingMessage {
    /// Build the pending record for a `NormalMessage` job.
    ///
    /// Returns `None` for any other payload.
    pub fn for_job(job: &Job, content: Vec<u8>, sent_at: Timestamp) -> Option<Self> {
        match &job.payload {
            JobPayload::NormalMessage {
                message_id,
                recipients,
            } => Some(Self {
                message_id: message_id.clone(),
                job_id: job.id.clone(),
                conversation_id: job.conversation_id.clone(),
                recipients: recipients.clone(),
                content,
                sent_at,
                created_at: job.created_at,
            }),
            _ => None,
        }
    }
}

/// Side data persisted in the same transaction as a job insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceHook {
    /// Persist the job row only.
    None,
    /// Persist the job together with its pending-message record.
    PendingMessage(PendingMessage),
    /// Do not persist anything; the job lives only in memory.
    Ephemeral,
}

/// Terminal outcome of a job, delivered through its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Completed,
    Failed { reason: String },
    Skipped { reason: String },
    /// The user backed out of a hold the job was waiting on.
    Cancelled { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_json_is_tagged_by_kind() {
        let payload = JobPayload::NullMessage {
            recipient: "c1".into(),
            id_for_tracking: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""type":"null_message""#), "got {json}");
        let back: JobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), JobKind::NullMessage);
    }

    #[test]
    fn receipts_recipients_are_distinct_senders() {
        let payload = JobPayload::Receipts {
            kind: OutgoingReceiptKind::Read,
            receipts: vec![
                OutgoingReceipt {
                    sender: "a".into(),
                    message_id: "m1".into(),
                    sent_at: 1,
                },
                OutgoingReceipt {
                    sender: "b".into(),
                    message_id: "m2".into(),
                    sent_at: 2,
                },
                OutgoingReceipt {
                    sender: "a".into(),
                    message_id: "m3".into(),
                    sent_at: 3,
                },
            ],
        };
        assert_eq!(
            payload.recipients(),
            vec![ConversationId::from("a"), ConversationId::from("b")]
        );
    }

    #[test]
    fn narrowing_keeps_only_listed_recipients() {
        let mut payload = JobPayload::NormalMessage {
            message_id: "m1".into(),
            recipients: vec!["a".into(), "b".into(), "c".into()],
        };
        payload.narrow_recipients(&["c".into(), "a".into()]);
        assert_eq!(
            payload.recipients(),
            vec![ConversationId::from("a"), ConversationId::from("c")]
        );
    }

    #[test]
    fn pending_record_only_for_normal_messages() {
        let job = Job::new(
            "c1",
            JobPayload::NormalMessage {
                message_id: "m1".into(),
                recipients: vec!["a".into()],
            },
            10,
        );
        let pending = PendingMessage::for_job(&job, b"hi".to_vec(), 10).unwrap();
        assert_eq!(pending.job_id, job.id);
        assert_eq!(pending.recipients, vec![ConversationId::from("a")]);

        let other = Job::new(
            "c1",
            JobPayload::NullMessage {
                recipient: "a".into(),
                id_for_tracking: None,
            },
            10,
        );
        assert!(PendingMessage::for_job(&other, Vec::new(), 10).is_none());
    }
}
