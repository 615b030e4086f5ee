// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence interface used by the queue, the reconciler, and the
//! expiration scheduler.

use async_trait::async_trait;

use crate::error::MissiveError;
use crate::job::{Job, PendingMessage};
use crate::types::{
    Conversation, ConversationId, JobId, MessageId, SendEvent, ServiceId, StoredMessage, Timestamp,
};

/// Durable job queue and pending-message records.
///
/// Every method that touches both a job and its pending record does so in a
/// single transaction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job, plus its pending record when given.
    async fn insert_job(
        &self,
        job: &Job,
        pending: Option<&PendingMessage>,
    ) -> Result<(), MissiveError>;

    /// Persist the attempt counter before a handler runs.
    async fn record_attempt(&self, job_id: &JobId, attempts: u32) -> Result<(), MissiveError>;

    /// Store a retry-armed job (payload, attempts, retry_at) and its narrowed
    /// pending record.
    async fn rearm_job(
        &self,
        job: &Job,
        pending: Option<&PendingMessage>,
    ) -> Result<(), MissiveError>;

    /// Remove a job that reached a terminal state, and its pending record.
    async fn complete_job(
        &self,
        job_id: &JobId,
        message_id: Option<&MessageId>,
    ) -> Result<(), MissiveError>;

    /// All persisted jobs in enqueue order.
    async fn load_jobs(&self) -> Result<Vec<Job>, MissiveError>;

    /// Whether the job row is still stored.
    async fn job_exists(&self, job_id: &JobId) -> Result<bool, MissiveError>;

    async fn get_pending(&self, message_id: &MessageId)
        -> Result<Option<PendingMessage>, MissiveError>;

    /// Pending records, optionally limited to one conversation, oldest first.
    async fn list_pending(
        &self,
        conversation_id: Option<&ConversationId>,
    ) -> Result<Vec<PendingMessage>, MissiveError>;

    async fn delete_pending(&self, message_id: &MessageId) -> Result<(), MissiveError>;
}

/// Message rows used for send bookkeeping, receipt matching, and expiry.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert or replace a message row.
    async fn save_message(&self, message: &StoredMessage) -> Result<(), MissiveError>;

    async fn get_message(&self, id: &MessageId) -> Result<Option<StoredMessage>, MissiveError>;

    async fn messages_by_sent_at(
        &self,
        sent_at: Timestamp,
    ) -> Result<Vec<StoredMessage>, MissiveError>;

    /// Fold send-state events into a message atomically.
    ///
    /// Recipients without an entry get one starting from `Pending`. Returns
    /// the updated message, or `None` if it no longer exists.
    async fn apply_send_events(
        &self,
        id: &MessageId,
        events: &[(ConversationId, SendEvent)],
        at: Timestamp,
    ) -> Result<Option<StoredMessage>, MissiveError>;

    /// Mark one unread message read. Starts its expiration timer if it has
    /// one. Returns the updated row, or `None` if it was not unread.
    async fn mark_read(
        &self,
        id: &MessageId,
        read_at: Timestamp,
    ) -> Result<Option<StoredMessage>, MissiveError>;

    /// Mark every unread incoming message in a conversation sent at or before
    /// `sent_at` as read. Returns the rows that changed.
    async fn mark_read_up_to(
        &self,
        conversation_id: &ConversationId,
        sent_at: Timestamp,
        read_at: Timestamp,
    ) -> Result<Vec<StoredMessage>, MissiveError>;

    /// Start the expiration timer of a message if it has not started yet.
    async fn start_expiration(&self, id: &MessageId, start: Timestamp)
        -> Result<(), MissiveError>;

    /// Messages whose `expires_at` is at or before `now`, soonest first.
    async fn expired_messages(&self, now: Timestamp) -> Result<Vec<StoredMessage>, MissiveError>;

    /// The soonest `expires_at` across all messages.
    async fn next_expiration(&self) -> Result<Option<Timestamp>, MissiveError>;

    /// Messages with a timer but no start.
    async fn messages_missing_expiration_start(
        &self,
    ) -> Result<Vec<StoredMessage>, MissiveError>;

    /// Delete messages by id, returning how many rows were removed.
    async fn delete_messages(&self, ids: &[MessageId]) -> Result<usize, MissiveError>;
}

/// Conversation rows used by recipient resolution and receipt matching.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), MissiveError>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, MissiveError>;

    /// Load several conversations at once. Unknown ids are omitted.
    async fn get_conversations(
        &self,
        ids: &[ConversationId],
    ) -> Result<Vec<Conversation>, MissiveError>;

    async fn find_by_service_id(
        &self,
        service_id: &ServiceId,
    ) -> Result<Option<Conversation>, MissiveError>;

    async fn mark_unregistered(
        &self,
        id: &ConversationId,
        at: Timestamp,
    ) -> Result<(), MissiveError>;

    /// Record whether the contact's current identity key is accepted.
    async fn set_identity_trusted(
        &self,
        id: &ConversationId,
        trusted: bool,
    ) -> Result<(), MissiveError>;
}

/// Everything the pipeline needs from persistence, as one object.
pub trait Storage: JobStore + MessageStore + ConversationStore {}

impl<T> Storage for T where T: JobStore + MessageStore + ConversationStore {}
