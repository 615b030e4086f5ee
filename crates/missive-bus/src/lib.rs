// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notification bus for the Missive delivery pipeline.
//!
//! A thin wrapper over a tokio `broadcast` channel. Publishing never blocks
//! and never fails: with no subscribers the event is dropped, and a lagging
//! subscriber loses the oldest events rather than slowing the publisher.

pub mod events;

pub use events::{BusEvent, Notification};

use tokio::sync::broadcast;
use tracing::trace;

/// Default buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

pub type EventReceiver = broadcast::Receiver<BusEvent>;

/// Cloneable handle to the notification channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    /// Publish a notification to every current subscriber.
    pub fn publish(&self, notification: Notification) {
        let event = BusEvent::new(notification);
        trace!(event_id = %event.id, kind = event.notification.kind(), "publishing");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
