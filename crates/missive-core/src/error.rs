// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Missive delivery pipeline.

use thiserror::Error;

use crate::types::{ConversationId, MessageId};

/// The primary error type used across Missive crates and collaborator traits.
///
/// Send failures reported by the secure channel are *not* represented here;
/// they use [`SendError`](crate::send::SendError) so the classifier can reason
/// about them per recipient.
#[derive(Debug, Error)]
pub enum MissiveError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Secure channel errors that are not attributable to a recipient.
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A conversation referenced by a job or receipt does not exist locally.
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// A message job lost its pending-message record.
    #[error("pending message record missing for {0}")]
    PendingMessageMissing(MessageId),

    /// A job was rejected before it could be persisted.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// JSON encoding or decoding of a persisted column failed.
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// The component is shutting down and no longer accepts work.
    #[error("shutting down")]
    Shutdown,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}
