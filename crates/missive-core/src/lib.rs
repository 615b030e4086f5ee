// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Missive delivery pipeline.
//!
//! This crate provides the domain types (jobs, pending-message records,
//! conversations, stored messages, receipts), the error type, and the
//! collaborator traits (secure channel, persistence, message observer) that
//! the queue, the receipt reconciler, and the expiration scheduler are
//! written against.

pub mod error;
pub mod job;
pub mod receipt;
pub mod send;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::MissiveError;
pub use job::{
    Job, JobKind, JobPayload, JobResult, OutgoingReceipt, OutgoingReceiptKind, PendingMessage,
    PersistenceHook,
};
pub use receipt::{Receipt, ReceiptKind};
pub use send::{OutgoingContent, RecipientFailure, SendError, SendRequest, SendSummary};
pub use types::{
    now_ms, Conversation, ConversationId, ConversationKind, Direction, JobId, MessageId,
    ReadStatus, SendEvent, SendState, SendStatus, ServiceId, StoredMessage, Timestamp,
};

pub use traits::{
    ConversationStore, JobStore, MessageObserver, MessageStore, SecureChannel, Storage,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missive_error_variants_render() {
        let storage = MissiveError::Storage {
            source: Box::new(std::io::Error::other("disk")),
        };
        assert_eq!(storage.to_string(), "storage error: disk");

        let missing = MissiveError::PendingMessageMissing("m1".into());
        assert!(missing.to_string().contains("m1"));

        let timeout = MissiveError::Timeout {
            duration: std::time::Duration::from_secs(3),
        };
        assert!(timeout.to_string().contains("3s"));
    }

    #[test]
    fn serde_errors_convert() {
        let err = serde_json::from_str::<JobPayload>("{").unwrap_err();
        let err: MissiveError = err.into();
        assert!(matches!(err, MissiveError::Serialization { .. }));
    }

    #[test]
    fn partial_send_error_counts() {
        let err = SendError::Partial {
            succeeded: vec!["a".into()],
            failures: vec![RecipientFailure {
                recipient: "b".into(),
                error: SendError::Timeout,
            }],
        };
        assert_eq!(err.to_string(), "1 recipient(s) failed, 1 succeeded");
    }

    #[test]
    fn all_traits_are_object_safe() {
        fn _job(_: &dyn JobStore) {}
        fn _msg(_: &dyn MessageStore) {}
        fn _conv(_: &dyn ConversationStore) {}
        fn _chan(_: &dyn SecureChannel) {}
        fn _obs(_: &dyn MessageObserver) {}
        fn _all(_: &dyn Storage) {}
    }

    #[test]
    fn receipt_accessors() {
        let r = Receipt::ReadSync {
            sender: "s1".into(),
            target_sent_at: 42,
            read_at: 50,
        };
        assert_eq!(r.kind(), ReceiptKind::ReadSync);
        assert_eq!(r.counterparty(), &ServiceId::from("s1"));
        assert_eq!(r.target_sent_at(), 42);
    }
}
