// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receipt reconciliation for the Missive delivery pipeline.
//!
//! Delivery and read receipts advance the per-recipient send state of
//! outgoing messages. Read-sync receipts from linked devices mark incoming
//! messages read. Receipts that arrive before their message wait in a
//! [`ReceiptBuffer`] until the message is saved.

pub mod buffer;
pub mod reconciler;

pub use buffer::{BufferedReceipt, ReceiptBuffer, ReceiptKey};
pub use reconciler::{ReceiptOutcome, ReceiptReconciler};
