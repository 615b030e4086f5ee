// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expiration sweep scheduler.
//!
//! One task owns the timer. Each turn of its loop sweeps what is due, asks
//! storage for the soonest remaining deadline and sleeps until then. A
//! [`ExpirationScheduler::schedule`] call or an `ExpirationStarted`
//! notification interrupts the sleep so the deadline is recomputed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use missive_bus::{EventBus, Notification};
use missive_config::model::ExpiryConfig;
use missive_core::{
    now_ms, Direction, MessageId, MissiveError, ReadStatus, Storage, StoredMessage, Timestamp,
};
use missive_resilience::{DedupError, TaskDeduplicator};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::delay::next_wake_delay;

/// Pause after a failed sweep before the loop tries again.
const SWEEP_RETRY_DELAY: Duration = Duration::from_secs(5);

struct Inner {
    storage: Arc<dyn Storage>,
    bus: EventBus,
    debounce: Duration,
    max_delay: Duration,
    wake: Notify,
    sweep: TaskDeduplicator<Vec<StoredMessage>, String>,
    started: AtomicBool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

#[derive(Clone)]
pub struct ExpirationScheduler {
    inner: Arc<Inner>,
}

impl ExpirationScheduler {
    pub fn new(storage: Arc<dyn Storage>, bus: EventBus, config: &ExpiryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                bus,
                debounce: config.debounce(),
                max_delay: config.max_timer_delay(),
                wake: Notify::new(),
                sweep: TaskDeduplicator::new("expiration-sweep"),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Spawn the timer loop and the bus listener. Later calls do nothing.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let events = self.inner.bus.subscribe();
        let listener = self.clone();
        self.inner
            .tracker
            .spawn(async move { listener.listen(events).await });
        let timer = self.clone();
        self.inner.tracker.spawn(async move { timer.run().await });
        info!(
            max_delay_ms = self.inner.max_delay.as_millis() as u64,
            "expiration scheduler started"
        );
    }

    /// Ask the loop to recompute its next wake. Bursts of calls inside the
    /// debounce window collapse into one recompute.
    pub fn schedule(&self) {
        self.inner.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.shutdown.is_cancelled()
    }

    /// Delete every message due now and announce each one.
    ///
    /// Concurrent calls share a single sweep.
    pub async fn sweep(&self) -> Result<Vec<StoredMessage>, MissiveError> {
        let storage = self.inner.storage.clone();
        let bus = self.inner.bus.clone();
        self.inner
            .sweep
            .run(
                move |_cancel| async move {
                    sweep_due(storage.as_ref(), &bus, now_ms())
                        .await
                        .map_err(|e| e.to_string())
                },
                Some(self.inner.shutdown.clone()),
            )
            .await
            .map_err(|e| match e {
                DedupError::Task(message) => {
                    MissiveError::Internal(format!("expiration sweep failed: {message}"))
                }
                DedupError::Aborted => MissiveError::Shutdown,
                DedupError::Panicked => {
                    MissiveError::Internal("expiration sweep panicked".to_string())
                }
            })
    }

    /// Give a start to timed messages that should already be counting down.
    ///
    /// Outgoing messages start at `sent_at`. Read incoming messages start at
    /// `read_at`, or `received_at` when that is missing. Unread incoming
    /// messages are left alone until they are read.
    pub async fn repair_missing_expiration_starts(&self) -> Result<usize, MissiveError> {
        let candidates = self.inner.storage.messages_missing_expiration_start().await?;
        let mut repaired = 0;
        for message in &candidates {
            let Some(start) = repair_start(message) else {
                continue;
            };
            self.inner.storage.start_expiration(&message.id, start).await?;
            repaired += 1;
        }
        if repaired > 0 {
            info!(repaired, "expiration starts repaired");
            self.schedule();
        }
        Ok(repaired)
    }

    /// Stop the loop and the listener and wait for both to exit.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        debug!("expiration scheduler stopped");
    }

    async fn run(&self) {
        let shutdown = self.inner.shutdown.clone();
        loop {
            let delay = match self.sweep().await {
                Ok(_) => self.next_delay().await,
                Err(MissiveError::Shutdown) => return,
                Err(e) => {
                    warn!(error = %e, "expiration sweep failed");
                    Some(SWEEP_RETRY_DELAY)
                }
            };

            let sleep = async {
                match delay {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = self.inner.wake.notified() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.inner.debounce) => {}
                    }
                }
                _ = sleep => {}
            }
        }
    }

    async fn next_delay(&self) -> Option<Duration> {
        match self.inner.storage.next_expiration().await {
            Ok(Some(expires_at)) => {
                let delay = next_wake_delay(expires_at, now_ms(), self.inner.max_delay);
                debug!(expires_at, delay_ms = delay.as_millis() as u64, "next expiration");
                Some(delay)
            }
            Ok(None) => {
                debug!("no expiring messages");
                None
            }
            Err(e) => {
                warn!(error = %e, "next expiration lookup failed");
                Some(SWEEP_RETRY_DELAY)
            }
        }
    }

    async fn listen(&self, mut events: missive_bus::EventReceiver) {
        let shutdown = self.inner.shutdown.clone();
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => return,
                received = events.recv() => received,
            };
            match received {
                Ok(event) => {
                    if let Notification::ExpirationStarted { message_id, expires_at } =
                        &event.notification
                    {
                        debug!(%message_id, expires_at, "expiration started");
                        self.schedule();
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "expiry listener lagged");
                    self.schedule();
                }
                Err(RecvError::Closed) => return,
            }
        }
    }
}

async fn sweep_due(
    storage: &dyn Storage,
    bus: &EventBus,
    now: Timestamp,
) -> Result<Vec<StoredMessage>, MissiveError> {
    let due = storage.expired_messages(now).await?;
    if due.is_empty() {
        return Ok(due);
    }
    let ids: Vec<MessageId> = due.iter().map(|m| m.id.clone()).collect();
    let deleted = storage.delete_messages(&ids).await?;

    for message in &due {
        bus.publish(Notification::MessageExpired {
            message_id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
        });
    }
    metrics::counter!("missive_messages_expired_total").increment(deleted as u64);
    info!(expired = deleted, "expired messages removed");
    Ok(due)
}

fn repair_start(message: &StoredMessage) -> Option<Timestamp> {
    match (message.direction, message.read_status) {
        (Direction::Outgoing, _) => Some(message.sent_at),
        (Direction::Incoming, ReadStatus::Read) => {
            Some(message.read_at.unwrap_or(message.received_at))
        }
        (Direction::Incoming, ReadStatus::Unread) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::MessageStore;
    use missive_test_utils::{next_matching, TestHarness};

    fn timed_outgoing(id: &str, sent_at: Timestamp, timer_ms: i64) -> StoredMessage {
        let mut m = StoredMessage::outgoing(id, "c", sent_at, &["c".into()]);
        m.expire_timer_ms = Some(timer_ms);
        m.expiration_start = Some(sent_at);
        m
    }

    #[test]
    fn repair_start_follows_direction_and_read_state() {
        let out = StoredMessage::outgoing("o", "c", 10, &[]);
        assert_eq!(repair_start(&out), Some(10));

        let mut read = StoredMessage::incoming("i", "c", "s", 10, 20);
        read.read_status = ReadStatus::Read;
        assert_eq!(repair_start(&read), Some(20));
        read.read_at = Some(30);
        assert_eq!(repair_start(&read), Some(30));

        let unread = StoredMessage::incoming("u", "c", "s", 10, 20);
        assert_eq!(repair_start(&unread), None);
    }

    #[tokio::test]
    async fn sweep_removes_only_due_messages() {
        let h = TestHarness::new().await.unwrap();
        let now = now_ms();
        h.storage.save_message(&timed_outgoing("old", now - 10_000, 1_000)).await.unwrap();
        h.storage.save_message(&timed_outgoing("new", now, 3_600_000)).await.unwrap();
        let scheduler = ExpirationScheduler::new(h.storage(), h.bus.clone(), &h.config.expiry);
        let mut rx = h.subscribe();

        let removed = scheduler.sweep().await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, MessageId::from("old"));
        assert!(h.message("old").await.unwrap().is_none());
        assert!(h.message("new").await.unwrap().is_some());

        let expired = next_matching(&mut rx, Duration::from_secs(1), |n| {
            matches!(n, Notification::MessageExpired { .. })
        })
        .await;
        assert_eq!(
            expired,
            Some(Notification::MessageExpired {
                message_id: "old".into(),
                conversation_id: "c".into(),
            })
        );
    }

    #[tokio::test]
    async fn repair_leaves_unread_incoming_alone() {
        let h = TestHarness::new().await.unwrap();
        let mut out = StoredMessage::outgoing("o", "c", 1_000, &[]);
        out.expire_timer_ms = Some(5_000);
        h.storage.save_message(&out).await.unwrap();
        let mut unread = StoredMessage::incoming("u", "c", "s", 1_000, 1_100);
        unread.expire_timer_ms = Some(5_000);
        h.storage.save_message(&unread).await.unwrap();

        let scheduler = ExpirationScheduler::new(h.storage(), h.bus.clone(), &h.config.expiry);
        assert_eq!(scheduler.repair_missing_expiration_starts().await.unwrap(), 1);

        assert_eq!(h.message("o").await.unwrap().unwrap().expires_at(), Some(6_000));
        assert_eq!(h.message("u").await.unwrap().unwrap().expiration_start, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loop_wakes_for_newly_started_timers() {
        let h = TestHarness::new().await.unwrap();
        let scheduler = ExpirationScheduler::new(h.storage(), h.bus.clone(), &h.config.expiry);
        let mut rx = h.subscribe();
        scheduler.start();
        assert!(scheduler.is_running());

        // Nothing to expire yet; the loop is parked with no deadline.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let now = now_ms();
        h.storage.save_message(&timed_outgoing("m1", now, 150)).await.unwrap();
        h.bus.publish(Notification::ExpirationStarted {
            message_id: "m1".into(),
            expires_at: now + 150,
        });

        let expired = next_matching(&mut rx, Duration::from_secs(3), |n| {
            matches!(n, Notification::MessageExpired { .. })
        })
        .await;
        assert!(expired.is_some());
        assert!(h.message("m1").await.unwrap().is_none());

        scheduler.shutdown().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sooner_deadline_preempts_a_long_sleep() {
        let h = TestHarness::new().await.unwrap();
        let now = now_ms();
        h.storage.save_message(&timed_outgoing("late", now, 3_600_000)).await.unwrap();
        let scheduler = ExpirationScheduler::new(h.storage(), h.bus.clone(), &h.config.expiry);
        let mut rx = h.subscribe();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        h.storage.save_message(&timed_outgoing("soon", now_ms(), 100)).await.unwrap();
        scheduler.schedule();

        let expired = next_matching(&mut rx, Duration::from_secs(3), |n| {
            matches!(n, Notification::MessageExpired { .. })
        })
        .await;
        assert_eq!(
            expired,
            Some(Notification::MessageExpired {
                message_id: "soon".into(),
                conversation_id: "c".into(),
            })
        );
        assert!(h.message("late").await.unwrap().is_some());
        scheduler.shutdown().await;
    }
}
