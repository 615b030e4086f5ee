// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end delivery scenarios through the outgoing queues.

use std::time::Duration;

use missive_bus::Notification;
use missive_core::{
    now_ms, ConversationId, ConversationStore, Job, JobPayload, JobResult, PendingMessage,
    PersistenceHook, SendStatus, ServiceId,
};
use missive_sender::{OutgoingQueues, QueueSettings, SenderContext};
use missive_test_utils::{next_matching, TestHarness};

fn queues(h: &TestHarness) -> OutgoingQueues {
    let ctx = SenderContext::new(h.storage(), h.secure_channel(), h.bus.clone());
    OutgoingQueues::new(ctx, QueueSettings::from_config(&h.config.queue))
}

async fn send_message(
    q: &OutgoingQueues,
    h: &TestHarness,
    message_id: &str,
    conversation: &str,
    recipients: &[&str],
) -> JobResult {
    let sent_at = now_ms();
    h.save_outgoing(message_id, conversation, sent_at, recipients)
        .await
        .unwrap();
    let job = Job::new(
        conversation,
        JobPayload::NormalMessage {
            message_id: message_id.into(),
            recipients: recipients.iter().map(|r| ConversationId::from(*r)).collect(),
        },
        sent_at,
    );
    let pending = PendingMessage::for_job(&job, b"hello".to_vec(), sent_at).unwrap();
    q.enqueue(job, PersistenceHook::PendingMessage(pending))
        .await
        .unwrap()
        .completion()
        .await
        .unwrap()
}

#[tokio::test]
async fn trusted_untrusted_and_unregistered_recipients() {
    let h = TestHarness::new().await.unwrap();
    h.add_contact("r1").await.unwrap();
    let mut r2 = h.add_contact("r2").await.unwrap();
    r2.identity_untrusted = true;
    h.storage.save_conversation(&r2).await.unwrap();
    let mut r3 = h.add_contact("r3").await.unwrap();
    r3.unregistered_at = Some(1);
    h.storage.save_conversation(&r3).await.unwrap();
    h.add_group("c", &["r1", "r2", "r3"]).await.unwrap();

    let q = queues(&h);
    let mut rx = h.subscribe();

    let result = send_message(&q, &h, "m1", "c", &["r1", "r2", "r3"]).await;
    assert_eq!(result, JobResult::Completed);

    let requests = h.channel.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].recipients, vec![ServiceId::from("svc-r1")]);

    let msg = h.message("m1").await.unwrap().unwrap();
    assert_eq!(msg.send_state[&ConversationId::from("r1")].status, SendStatus::Sent);
    assert_eq!(msg.send_state[&ConversationId::from("r2")].status, SendStatus::Failed);
    assert_eq!(msg.send_state[&ConversationId::from("r3")].status, SendStatus::Failed);
    assert!(
        next_matching(&mut rx, Duration::from_secs(1), |n| matches!(
            n,
            Notification::VerificationRequired { conversation_id, .. } if conversation_id.as_str() == "r2"
        ))
        .await
        .is_some()
    );

    // Once R2 is trusted again it is addressable; R3 stays dropped.
    h.storage
        .set_identity_trusted(&"r2".into(), true)
        .await
        .unwrap();
    let result = send_message(&q, &h, "m2", "c", &["r1", "r2", "r3"]).await;
    assert_eq!(result, JobResult::Completed);
    let requests = h.channel.requests().await;
    assert_eq!(
        requests[1].recipients,
        vec![ServiceId::from("svc-r1"), ServiceId::from("svc-r2")]
    );
}

#[tokio::test]
async fn unregistered_error_from_the_network_is_remembered() {
    let h = TestHarness::new().await.unwrap();
    h.add_contact("r1").await.unwrap();
    h.add_contact("r3").await.unwrap();
    h.add_group("c", &["r1", "r3"]).await.unwrap();
    h.channel
        .push_error(missive_core::SendError::Partial {
            succeeded: vec!["svc-r1".into()],
            failures: vec![missive_core::RecipientFailure {
                recipient: "svc-r3".into(),
                error: missive_core::SendError::Unregistered("svc-r3".into()),
            }],
        })
        .await;
    let q = queues(&h);
    let mut rx = h.subscribe();

    assert_eq!(
        send_message(&q, &h, "m1", "c", &["r1", "r3"]).await,
        JobResult::Completed
    );
    let r3 = h.storage.get_conversation(&"r3".into()).await.unwrap().unwrap();
    assert!(r3.is_unregistered());
    assert!(
        next_matching(&mut rx, Duration::from_secs(1), |n| matches!(
            n,
            Notification::RecipientUnregistered { .. }
        ))
        .await
        .is_some()
    );

    // The next message no longer addresses R3.
    send_message(&q, &h, "m2", "c", &["r1", "r3"]).await;
    let requests = h.channel.requests().await;
    assert_eq!(requests[1].recipients, vec![ServiceId::from("svc-r1")]);
}

#[tokio::test]
async fn conversations_progress_independently() {
    let h = TestHarness::new().await.unwrap();
    h.add_contact("slow").await.unwrap();
    h.add_contact("fast").await.unwrap();
    h.channel.set_latency(Duration::from_millis(30)).await;
    let q = queues(&h);

    let (a, b) = tokio::join!(
        send_message(&q, &h, "m-slow", "slow", &["slow"]),
        send_message(&q, &h, "m-fast", "fast", &["fast"]),
    );
    assert_eq!(a, JobResult::Completed);
    assert_eq!(b, JobResult::Completed);
    assert_eq!(q.conversations(), 2);
    assert_eq!(h.channel.max_concurrent_per_conversation().await, 1);
}
