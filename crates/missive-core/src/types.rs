// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common domain types shared by the queue, the reconciler, and storage.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a conversation (a direct contact or a group).
    ConversationId
);
string_id!(
    /// Network send address of a contact.
    ServiceId
);
string_id!(
    /// Unique identifier for a message.
    MessageId
);
string_id!(
    /// Unique identifier for an outgoing job.
    JobId
);

impl JobId {
    /// Generate a fresh random job id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// --- Conversations ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// A conversation row as seen by recipient resolution and receipt matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Send address. Only direct conversations have one.
    pub service_id: Option<ServiceId>,
    /// Current members of a group. Empty for direct conversations.
    pub members: Vec<ServiceId>,
    /// This conversation is the local account ("Note to Self").
    pub is_self: bool,
    pub blocked: bool,
    pub unregistered_at: Option<Timestamp>,
    /// The contact's identity key changed and has not been re-accepted.
    pub identity_untrusted: bool,
    /// Reserved service conversation that never receives user content.
    pub is_system: bool,
}

impl Conversation {
    /// A registered, trusted direct contact.
    pub fn direct(id: impl Into<ConversationId>, service_id: impl Into<ServiceId>) -> Self {
        Self {
            id: id.into(),
            kind: ConversationKind::Direct,
            service_id: Some(service_id.into()),
            members: Vec::new(),
            is_self: false,
            blocked: false,
            unregistered_at: None,
            identity_untrusted: false,
            is_system: false,
        }
    }

    /// A group with the given member addresses.
    pub fn group(id: impl Into<ConversationId>, members: Vec<ServiceId>) -> Self {
        Self {
            id: id.into(),
            kind: ConversationKind::Group,
            service_id: None,
            members,
            is_self: false,
            blocked: false,
            unregistered_at: None,
            identity_untrusted: false,
            is_system: false,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    pub fn is_unregistered(&self) -> bool {
        self.unregistered_at.is_some()
    }

    /// Whether `service_id` currently belongs to this conversation.
    pub fn has_member(&self, service_id: &ServiceId) -> bool {
        match self.kind {
            ConversationKind::Group => self.members.contains(service_id),
            ConversationKind::Direct => self.service_id.as_ref() == Some(service_id),
        }
    }
}

// --- Messages ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    Unread,
    Read,
}

/// Per-recipient delivery status of an outgoing message.
///
/// Variants are declared in progress order; derived `Ord` is relied upon by
/// [`SendState::apply`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Failed,
    Pending,
    Sent,
    Delivered,
    Read,
    Viewed,
}

/// Events that move a [`SendState`] forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SendEvent {
    Sent,
    Failed,
    Delivered,
    Read,
    Viewed,
    ManualRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendState {
    pub status: SendStatus,
    pub updated_at: Timestamp,
}

impl SendState {
    pub fn pending(at: Timestamp) -> Self {
        Self {
            status: SendStatus::Pending,
            updated_at: at,
        }
    }

    /// Apply an event, returning the resulting state.
    ///
    /// Progress events never lower the status. `Failed` only lands on a
    /// pending recipient and `ManualRetry` only lifts a failed one.
    pub fn apply(self, event: SendEvent, at: Timestamp) -> SendState {
        let next = match event {
            SendEvent::Failed if self.status == SendStatus::Pending => SendStatus::Failed,
            SendEvent::Failed => return self,
            SendEvent::ManualRetry if self.status == SendStatus::Failed => SendStatus::Pending,
            SendEvent::ManualRetry => return self,
            SendEvent::Sent => self.status.max(SendStatus::Sent),
            SendEvent::Delivered => self.status.max(SendStatus::Delivered),
            SendEvent::Read => self.status.max(SendStatus::Read),
            SendEvent::Viewed => self.status.max(SendStatus::Viewed),
        };
        if next == self.status {
            return self;
        }
        SendState {
            status: next,
            updated_at: at,
        }
    }
}

/// A message row, as needed for send bookkeeping, receipt matching, and expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub direction: Direction,
    /// Author of an incoming message.
    pub source: Option<ServiceId>,
    pub sent_at: Timestamp,
    pub received_at: Timestamp,
    pub read_status: ReadStatus,
    pub read_at: Option<Timestamp>,
    /// Keyed by recipient conversation id. Outgoing messages only.
    pub send_state: BTreeMap<ConversationId, SendState>,
    pub expire_timer_ms: Option<i64>,
    pub expiration_start: Option<Timestamp>,
}

impl StoredMessage {
    /// An outgoing message pending to every listed recipient.
    pub fn outgoing(
        id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        sent_at: Timestamp,
        recipients: &[ConversationId],
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            direction: Direction::Outgoing,
            source: None,
            sent_at,
            received_at: sent_at,
            read_status: ReadStatus::Read,
            read_at: None,
            send_state: recipients
                .iter()
                .map(|r| (r.clone(), SendState::pending(sent_at)))
                .collect(),
            expire_timer_ms: None,
            expiration_start: None,
        }
    }

    /// An unread incoming message authored by `source`.
    pub fn incoming(
        id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        source: impl Into<ServiceId>,
        sent_at: Timestamp,
        received_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            direction: Direction::Incoming,
            source: Some(source.into()),
            sent_at,
            received_at,
            read_status: ReadStatus::Unread,
            read_at: None,
            send_state: BTreeMap::new(),
            expire_timer_ms: None,
            expiration_start: None,
        }
    }

    /// When the message is due for destruction, if its timer has started.
    pub fn expires_at(&self) -> Option<Timestamp> {
        match (self.expiration_start, self.expire_timer_ms) {
            (Some(start), Some(timer)) => Some(start.saturating_add(timer)),
            _ => None,
        }
    }

    /// Number of recipients that have at least received the message.
    pub fn delivered_count(&self) -> usize {
        self.send_state
            .values()
            .filter(|s| s.status >= SendStatus::Delivered)
            .count()
    }

    /// Number of recipients that have read (or viewed) the message.
    pub fn read_count(&self) -> usize {
        self.send_state
            .values()
            .filter(|s| s.status >= SendStatus::Read)
            .count()
    }

    pub fn viewed_count(&self) -> usize {
        self.send_state
            .values()
            .filter(|s| s.status == SendStatus::Viewed)
            .count()
    }
}
