// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receipt and message passes racing for the same receipts.

use std::sync::Arc;
use std::time::Duration;

use missive_bus::Notification;
use missive_core::{MessageObserver, Receipt, SendStatus};
use missive_receipts::{ReceiptBuffer, ReceiptReconciler};
use missive_test_utils::{next_matching, TestHarness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_passes_apply_each_receipt_once() {
    let h = TestHarness::new().await.unwrap();
    let members = ["a", "b", "c", "d", "e", "f"];
    for m in members {
        h.add_contact(m).await.unwrap();
    }
    h.add_group("g", &members).await.unwrap();

    let reconciler = Arc::new(ReceiptReconciler::new(
        h.storage(),
        h.bus.clone(),
        Arc::new(ReceiptBuffer::new()),
        &h.config.receipts,
    ));
    let mut rx = h.subscribe();

    // Half of the receipts arrive before the message exists.
    for m in &members[..3] {
        let outcome = reconciler
            .on_receipt(Receipt::Delivery {
                from: format!("svc-{m}").into(),
                target_sent_at: 500,
                at: 510,
            })
            .await
            .unwrap();
        assert_eq!(outcome, missive_receipts::ReceiptOutcome::Buffered);
    }

    let message = h.save_outgoing("m1", "g", 500, &members).await.unwrap();

    let mut tasks = Vec::new();
    for m in &members[3..] {
        let r = reconciler.clone();
        let from = format!("svc-{m}");
        tasks.push(tokio::spawn(async move {
            r.on_receipt(Receipt::Delivery {
                from: from.into(),
                target_sent_at: 500,
                at: 520,
            })
            .await
            .map(|_| ())
        }));
    }
    let r = reconciler.clone();
    tasks.push(tokio::spawn(async move {
        r.on_message_saved(&message).await;
        Ok(())
    }));
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    assert!(reconciler.buffer().is_empty());
    let stored = h.message("m1").await.unwrap().unwrap();
    assert!(
        stored
            .send_state
            .values()
            .all(|s| s.status == SendStatus::Delivered)
    );
    assert_eq!(stored.delivered_count(), members.len());

    let mut notified = 0;
    while next_matching(&mut rx, Duration::from_millis(200), |n| {
        matches!(n, Notification::MessageDelivered { .. })
    })
    .await
    .is_some()
    {
        notified += 1;
    }
    assert_eq!(notified, members.len());
}

#[tokio::test]
async fn unmatched_receipt_is_kept() {
    let h = TestHarness::new().await.unwrap();
    h.add_contact("bob").await.unwrap();
    let reconciler = ReceiptReconciler::new(
        h.storage(),
        h.bus.clone(),
        Arc::new(ReceiptBuffer::new()),
        &h.config.receipts,
    );

    reconciler
        .on_receipt(Receipt::Delivery {
            from: "svc-bob".into(),
            target_sent_at: 42,
            at: 50,
        })
        .await
        .unwrap();

    // A message at another timestamp does not consume it.
    let other = h.save_outgoing("m1", "bob", 43, &["bob"]).await.unwrap();
    reconciler.on_message_saved(&other).await;
    assert_eq!(reconciler.buffer().len(), 1);
    assert!(reconciler.buffer().contains(&("svc-bob".into(), 42)));
}
