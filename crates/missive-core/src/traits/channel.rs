// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The opaque secure-channel capability.

use async_trait::async_trait;

use crate::send::{SendError, SendRequest, SendSummary};

/// Encrypts and transmits content to already-resolved addresses.
///
/// Implementations report either full success or a structured error; an
/// aggregate [`SendError::Partial`] carries one failure per recipient.
#[async_trait]
pub trait SecureChannel: Send + Sync {
    async fn send(&self, request: SendRequest) -> Result<SendSummary, SendError>;
}
