// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Early-receipt buffer.
//!
//! Receipts wait here, keyed by `(counterparty, target_sent_at)`, until a
//! matching message exists. Every insert gets a sequence number and a
//! receipt leaves only through [`ReceiptBuffer::take`] with that number, so
//! two passes racing for the same receipt consume it once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use missive_core::{Receipt, ServiceId, Timestamp};

pub type ReceiptKey = (ServiceId, Timestamp);

/// A buffered receipt and the sequence number needed to take it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedReceipt {
    pub seq: u64,
    pub receipt: Receipt,
}

#[derive(Default)]
struct Entries {
    next_seq: u64,
    len: usize,
    by_sent_at: HashMap<Timestamp, Vec<BufferedReceipt>>,
}

/// Process-local store of unmatched receipts.
#[derive(Default)]
pub struct ReceiptBuffer {
    entries: Mutex<Entries>,
}

impl ReceiptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer a receipt and return its sequence number.
    pub fn insert(&self, receipt: Receipt) -> u64 {
        let mut entries = self.lock();
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries
            .by_sent_at
            .entry(receipt.target_sent_at())
            .or_default()
            .push(BufferedReceipt { seq, receipt });
        entries.len += 1;
        report(entries.len);
        seq
    }

    /// Remove and return the receipt inserted as `seq` under `key`.
    ///
    /// Returns `None` when another pass already took it.
    pub fn take(&self, key: &ReceiptKey, seq: u64) -> Option<Receipt> {
        let mut entries = self.lock();
        let (counterparty, sent_at) = key;
        let bucket = entries.by_sent_at.get_mut(sent_at)?;
        let index = bucket
            .iter()
            .position(|b| b.seq == seq && b.receipt.counterparty() == counterparty)?;
        let taken = bucket.swap_remove(index).receipt;
        if bucket.is_empty() {
            entries.by_sent_at.remove(sent_at);
        }
        entries.len -= 1;
        report(entries.len);
        Some(taken)
    }

    /// Snapshot of the receipts waiting for messages sent at `sent_at`.
    pub fn at_sent_at(&self, sent_at: Timestamp) -> Vec<BufferedReceipt> {
        let entries = self.lock();
        let mut found = entries
            .by_sent_at
            .get(&sent_at)
            .cloned()
            .unwrap_or_default();
        found.sort_by_key(|b| b.seq);
        found
    }

    pub fn contains(&self, key: &ReceiptKey) -> bool {
        let (counterparty, sent_at) = key;
        self.lock()
            .by_sent_at
            .get(sent_at)
            .is_some_and(|bucket| bucket.iter().any(|b| b.receipt.counterparty() == counterparty))
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.by_sent_at.clear();
        entries.len = 0;
        report(0);
    }
}

fn report(len: usize) {
    metrics::gauge!("missive_receipts_buffered").set(len as f64);
}
