// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receipt reconciler.
//!
//! Two passes meet at the [`ReceiptBuffer`]: the receipt pass runs when an
//! acknowledgement arrives, the message pass runs when a message row is
//! saved. Whichever pass finds a compatible pair takes the receipt out of
//! the buffer and applies it, so arrival order does not matter.

use std::sync::Arc;

use async_trait::async_trait;
use missive_bus::{EventBus, Notification};
use missive_config::model::ReceiptsConfig;
use missive_core::{
    Direction, MessageId, MessageObserver, MissiveError, ReadStatus, Receipt, ReceiptKind,
    SendEvent, ServiceId, Storage, StoredMessage, Timestamp,
};
use tracing::{debug, info, warn};

use crate::buffer::ReceiptBuffer;

/// What happened to a receipt handed to [`ReceiptReconciler::on_receipt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// Applied to this message.
    Matched { message_id: MessageId },
    /// No compatible message yet; waiting in the buffer.
    Buffered,
    /// Dropped because of the account's read-receipt setting.
    Ignored,
}

pub struct ReceiptReconciler {
    storage: Arc<dyn Storage>,
    bus: EventBus,
    buffer: Arc<ReceiptBuffer>,
    read_receipts: bool,
}

impl ReceiptReconciler {
    pub fn new(
        storage: Arc<dyn Storage>,
        bus: EventBus,
        buffer: Arc<ReceiptBuffer>,
        config: &ReceiptsConfig,
    ) -> Self {
        Self {
            storage,
            bus,
            buffer,
            read_receipts: config.read_receipts,
        }
    }

    pub fn buffer(&self) -> &Arc<ReceiptBuffer> {
        &self.buffer
    }

    /// Receipt pass: buffer the receipt, then try to match it right away.
    pub async fn on_receipt(&self, receipt: Receipt) -> Result<ReceiptOutcome, MissiveError> {
        let reads = matches!(receipt.kind(), ReceiptKind::Read | ReceiptKind::View);
        if reads && !self.read_receipts {
            debug!(
                from = %receipt.counterparty(),
                sent_at = receipt.target_sent_at(),
                "read receipts disabled, ignoring"
            );
            return Ok(ReceiptOutcome::Ignored);
        }

        let key = (receipt.counterparty().clone(), receipt.target_sent_at());
        let seq = self.buffer.insert(receipt.clone());
        metrics::counter!("missive_receipts_received_total", "kind" => kind_label(&receipt))
            .increment(1);

        let candidates = self.storage.messages_by_sent_at(key.1).await?;
        for message in candidates {
            if !self.is_match(&receipt, &message).await? {
                continue;
            }
            let Some(taken) = self.buffer.take(&key, seq) else {
                // The message pass got there first.
                return Ok(ReceiptOutcome::Matched {
                    message_id: message.id,
                });
            };
            if let Err(e) = self.apply(&taken, &message).await {
                self.buffer.insert(taken);
                return Err(e);
            }
            return Ok(ReceiptOutcome::Matched {
                message_id: message.id,
            });
        }

        debug!(
            from = %key.0,
            sent_at = key.1,
            kind = kind_label(&receipt),
            "no matching message, receipt buffered"
        );
        Ok(ReceiptOutcome::Buffered)
    }

    /// Message pass: apply every buffered receipt compatible with `message`.
    /// Returns how many were applied.
    pub async fn reconcile_message(&self, message: &StoredMessage) -> Result<usize, MissiveError> {
        let waiting = self.buffer.at_sent_at(message.sent_at);
        if waiting.is_empty() {
            return Ok(0);
        }

        let mut applied = 0;
        for entry in waiting {
            // Reload so each receipt sees the effect of the previous one.
            let Some(current) = self.storage.get_message(&message.id).await? else {
                break;
            };
            if !self.is_match(&entry.receipt, &current).await? {
                continue;
            }
            let key = (
                entry.receipt.counterparty().clone(),
                entry.receipt.target_sent_at(),
            );
            let Some(taken) = self.buffer.take(&key, entry.seq) else {
                continue;
            };
            if let Err(e) = self.apply(&taken, &current).await {
                self.buffer.insert(taken);
                return Err(e);
            }
            applied += 1;
        }
        Ok(applied)
    }

    async fn is_match(
        &self,
        receipt: &Receipt,
        message: &StoredMessage,
    ) -> Result<bool, MissiveError> {
        match receipt {
            Receipt::Delivery { from, .. }
            | Receipt::Read { from, .. }
            | Receipt::View { from, .. } => {
                if message.direction != Direction::Outgoing {
                    return Ok(false);
                }
                let Some(reader) = self.storage.find_by_service_id(from).await? else {
                    return Ok(false);
                };
                if message.send_state.contains_key(&reader.id) {
                    return Ok(true);
                }
                let owner = self
                    .storage
                    .get_conversation(&message.conversation_id)
                    .await?;
                Ok(owner.is_some_and(|c| c.is_group() && c.has_member(from)))
            }
            Receipt::ReadSync { sender, .. } => Ok(message.direction == Direction::Incoming
                && message.read_status == ReadStatus::Unread
                && message.source.as_ref() == Some(sender)),
        }
    }

    async fn apply(&self, receipt: &Receipt, message: &StoredMessage) -> Result<(), MissiveError> {
        match receipt {
            Receipt::Delivery { from, at, .. } => {
                self.apply_send_event(message, from, SendEvent::Delivered, *at)
                    .await
            }
            Receipt::Read { from, at, .. } => {
                self.apply_send_event(message, from, SendEvent::Read, *at)
                    .await
            }
            Receipt::View { from, at, .. } => {
                self.apply_send_event(message, from, SendEvent::Viewed, *at)
                    .await
            }
            Receipt::ReadSync { read_at, .. } => self.apply_read_sync(message, *read_at).await,
        }
    }

    async fn apply_send_event(
        &self,
        message: &StoredMessage,
        from: &ServiceId,
        event: SendEvent,
        at: Timestamp,
    ) -> Result<(), MissiveError> {
        let Some(reader) = self.storage.find_by_service_id(from).await? else {
            return Ok(());
        };
        let Some(updated) = self
            .storage
            .apply_send_events(&message.id, &[(reader.id.clone(), event)], at)
            .await?
        else {
            return Ok(());
        };

        let notification = match event {
            SendEvent::Read => Notification::MessageRead {
                message_id: updated.id.clone(),
                conversation_id: updated.conversation_id.clone(),
                from: from.clone(),
                read_count: updated.read_count(),
            },
            SendEvent::Viewed => Notification::MessageViewed {
                message_id: updated.id.clone(),
                conversation_id: updated.conversation_id.clone(),
                from: from.clone(),
                viewed_count: updated.viewed_count(),
            },
            _ => Notification::MessageDelivered {
                message_id: updated.id.clone(),
                conversation_id: updated.conversation_id.clone(),
                from: from.clone(),
                delivered_count: updated.delivered_count(),
            },
        };
        info!(
            message_id = %updated.id,
            from = %from,
            event = %event,
            "receipt applied"
        );
        metrics::counter!("missive_receipts_matched_total", "kind" => notification.kind())
            .increment(1);
        self.bus.publish(notification);
        Ok(())
    }

    async fn apply_read_sync(
        &self,
        message: &StoredMessage,
        read_at: Timestamp,
    ) -> Result<(), MissiveError> {
        let mut changed = Vec::new();
        if let Some(updated) = self.storage.mark_read(&message.id, read_at).await? {
            changed.push(updated);
        }
        changed.extend(
            self.storage
                .mark_read_up_to(&message.conversation_id, message.sent_at, read_at)
                .await?,
        );
        if changed.is_empty() {
            return Ok(());
        }

        info!(
            conversation_id = %message.conversation_id,
            read = changed.len(),
            "read on linked device"
        );
        metrics::counter!("missive_receipts_matched_total", "kind" => "conversation_read")
            .increment(1);
        self.bus.publish(Notification::ConversationRead {
            conversation_id: message.conversation_id.clone(),
            read_count: changed.len(),
            read_at,
        });

        for row in changed {
            if row.expiration_start != Some(read_at) {
                continue;
            }
            if let Some(expires_at) = row.expires_at() {
                self.bus.publish(Notification::ExpirationStarted {
                    message_id: row.id,
                    expires_at,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageObserver for ReceiptReconciler {
    async fn on_message_saved(&self, message: &StoredMessage) {
        match self.reconcile_message(message).await {
            Ok(0) => {}
            Ok(n) => debug!(message_id = %message.id, applied = n, "buffered receipts applied"),
            Err(e) => warn!(message_id = %message.id, error = %e, "receipt pass failed"),
        }
    }
}

fn kind_label(receipt: &Receipt) -> &'static str {
    match receipt.kind() {
        ReceiptKind::Delivery => "delivery",
        ReceiptKind::Read => "read",
        ReceiptKind::View => "view",
        ReceiptKind::ReadSync => "read_sync",
    }
}
