// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound acknowledgements.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::types::{ServiceId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Delivery,
    Read,
    View,
    ReadSync,
}

/// An acknowledgement referencing a message by author/reader and `sent_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Receipt {
    /// `from` received one of our outgoing messages.
    Delivery {
        from: ServiceId,
        target_sent_at: Timestamp,
        at: Timestamp,
    },
    /// `from` read one of our outgoing messages.
    Read {
        from: ServiceId,
        target_sent_at: Timestamp,
        at: Timestamp,
    },
    /// `from` opened view-once or story media from one of our messages.
    View {
        from: ServiceId,
        target_sent_at: Timestamp,
        at: Timestamp,
    },
    /// Another of our devices read an incoming message authored by `sender`.
    ReadSync {
        sender: ServiceId,
        target_sent_at: Timestamp,
        read_at: Timestamp,
    },
}

impl Receipt {
    pub fn kind(&self) -> ReceiptKind {
        match self {
            Receipt::Delivery { .. } => ReceiptKind::Delivery,
            Receipt::Read { .. } => ReceiptKind::Read,
            Receipt::View { .. } => ReceiptKind::View,
            Receipt::ReadSync { .. } => ReceiptKind::ReadSync,
        }
    }

    /// The identity the receipt is keyed by: reader for delivery, read and
    /// view, author for read-sync.
    pub fn counterparty(&self) -> &ServiceId {
        match self {
            Receipt::Delivery { from, .. }
            | Receipt::Read { from, .. }
            | Receipt::View { from, .. } => from,
            Receipt::ReadSync { sender, .. } => sender,
        }
    }

    pub fn target_sent_at(&self) -> Timestamp {
        match self {
            Receipt::Delivery { target_sent_at, .. }
            | Receipt::Read { target_sent_at, .. }
            | Receipt::View { target_sent_at, .. }
            | Receipt::ReadSync { target_sent_at, .. } => *target_sent_at,
        }
    }
}
