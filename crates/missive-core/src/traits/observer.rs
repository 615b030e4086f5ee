// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hook for components that react to newly persisted messages.

use async_trait::async_trait;

use crate::types::StoredMessage;

/// Notified after a message row has been written.
#[async_trait]
pub trait MessageObserver: Send + Sync {
    async fn on_message_saved(&self, message: &StoredMessage);
}
