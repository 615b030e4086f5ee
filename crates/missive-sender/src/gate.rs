// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation holds.
//!
//! A hold parks the job at the head of a conversation's queue until
//! something outside the queue releases it. Later jobs in the same
//! conversation wait behind it as usual.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use missive_core::{now_ms, ConversationId, Timestamp};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How long a held job sleeps before looking at its hold again.
pub const HOLD_RECHECK: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hold {
    /// Every target needs its changed identity confirmed.
    Verification { untrusted: Vec<ConversationId> },
    /// The user declined to verify. Jobs created at or before `canceled_at`
    /// are cancelled; a newer job clears the tombstone.
    VerificationCancelled { canceled_at: Timestamp },
    /// The server asked for a challenge. `until` is when it lapses on its own.
    Challenge {
        token: String,
        until: Option<Timestamp>,
    },
}

impl Hold {
    pub fn reason(&self) -> &'static str {
        match self {
            Hold::Verification { .. } | Hold::VerificationCancelled { .. } => "verification",
            Hold::Challenge { .. } => "challenge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    Resume,
    Cancel,
}

#[derive(Default)]
pub struct ConversationGates {
    holds: DashMap<ConversationId, Hold>,
    wakers: DashMap<ConversationId, Arc<Notify>>,
}

impl ConversationGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation: &ConversationId) -> Option<Hold> {
        self.holds.get(conversation).map(|h| h.value().clone())
    }

    pub fn is_held(&self, conversation: &ConversationId) -> bool {
        self.holds.contains_key(conversation)
    }

    pub(crate) fn hold(&self, conversation: &ConversationId, hold: Hold) {
        info!(%conversation, reason = hold.reason(), "conversation held");
        self.holds.insert(conversation.clone(), hold);
    }

    /// Drop the hold matching `pred` and wake the held job.
    pub(crate) fn release_if<F>(&self, conversation: &ConversationId, pred: F) -> Option<Hold>
    where
        F: FnOnce(&Hold) -> bool,
    {
        let (_, hold) = self.holds.remove_if(conversation, |_, h| pred(h))?;
        self.wake(conversation);
        Some(hold)
    }

    /// Turn a pending verification into a cancellation tombstone.
    pub(crate) fn cancel_verification(&self, conversation: &ConversationId, at: Timestamp) -> bool {
        let Some(mut hold) = self.holds.get_mut(conversation) else {
            return false;
        };
        if !matches!(*hold, Hold::Verification { .. }) {
            return false;
        }
        *hold = Hold::VerificationCancelled { canceled_at: at };
        drop(hold);
        self.wake(conversation);
        true
    }

    fn wake(&self, conversation: &ConversationId) {
        if let Some(waker) = self.wakers.get(conversation) {
            waker.notify_waiters();
        }
    }

    fn waker(&self, conversation: &ConversationId) -> Arc<Notify> {
        self.wakers
            .entry(conversation.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wait until the conversation is free for a job created at `created_at`.
    ///
    /// Returns `None` when `shutdown` fires first.
    pub(crate) async fn wait(
        &self,
        conversation: &ConversationId,
        created_at: Timestamp,
        shutdown: &CancellationToken,
    ) -> Option<Release> {
        if !self.is_held(conversation) {
            return Some(Release::Resume);
        }
        let waker = self.waker(conversation);
        loop {
            let notified = waker.notified();
            tokio::pin!(notified);
            // Register before reading the hold so a release in between is not lost.
            notified.as_mut().enable();

            let pause = match self.get(conversation) {
                None => return Some(Release::Resume),
                Some(Hold::VerificationCancelled { canceled_at }) => {
                    if canceled_at >= created_at {
                        return Some(Release::Cancel);
                    }
                    debug!(%conversation, "clearing verification tombstone");
                    self.holds.remove(conversation);
                    return Some(Release::Resume);
                }
                Some(Hold::Challenge {
                    until: Some(until), ..
                }) => {
                    let left = until.saturating_sub(now_ms());
                    if left <= 0 {
                        debug!(%conversation, "challenge lapsed");
                        self.holds.remove(conversation);
                        return Some(Release::Resume);
                    }
                    Duration::from_millis(left as u64).min(HOLD_RECHECK)
                }
                Some(_) => HOLD_RECHECK,
            };

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = &mut notified => {}
                _ = tokio::time::sleep(pause) => {
                    if pause == HOLD_RECHECK {
                        // Let the handler look again; it re-holds if nothing changed.
                        debug!(%conversation, "hold recheck");
                        self.holds.remove(conversation);
                        return Some(Release::Resume);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversationId {
        ConversationId::from("c1")
    }

    #[tokio::test]
    async fn free_conversation_resumes_at_once() {
        let gates = ConversationGates::new();
        let token = CancellationToken::new();
        assert_eq!(gates.wait(&conv(), 0, &token).await, Some(Release::Resume));
    }

    #[tokio::test]
    async fn release_wakes_the_waiter() {
        let gates = Arc::new(ConversationGates::new());
        gates.hold(
            &conv(),
            Hold::Verification {
                untrusted: vec!["a".into()],
            },
        );
        let token = CancellationToken::new();
        let waiter = {
            let gates = Arc::clone(&gates);
            let token = token.clone();
            tokio::spawn(async move { gates.wait(&conv(), 10, &token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let released = gates.release_if(&conv(), |h| matches!(h, Hold::Verification { .. }));
        assert!(released.is_some());
        assert_eq!(waiter.await.unwrap(), Some(Release::Resume));
        assert!(!gates.is_held(&conv()));
    }

    #[tokio::test]
    async fn cancellation_only_hits_older_jobs() {
        let gates = ConversationGates::new();
        let token = CancellationToken::new();
        gates.hold(
            &conv(),
            Hold::Verification {
                untrusted: vec!["a".into()],
            },
        );
        assert!(gates.cancel_verification(&conv(), 100));

        assert_eq!(gates.wait(&conv(), 100, &token).await, Some(Release::Cancel));
        assert_eq!(gates.wait(&conv(), 50, &token).await, Some(Release::Cancel));
        assert!(gates.is_held(&conv()), "tombstone outlives the cancelled jobs");

        assert_eq!(gates.wait(&conv(), 101, &token).await, Some(Release::Resume));
        assert!(!gates.is_held(&conv()));
    }

    #[tokio::test]
    async fn cancel_needs_a_pending_verification() {
        let gates = ConversationGates::new();
        assert!(!gates.cancel_verification(&conv(), 1));
        gates.hold(
            &conv(),
            Hold::Challenge {
                token: "t".into(),
                until: None,
            },
        );
        assert!(!gates.cancel_verification(&conv(), 1));
    }

    #[tokio::test]
    async fn lapsed_challenge_resumes() {
        let gates = ConversationGates::new();
        let token = CancellationToken::new();
        gates.hold(
            &conv(),
            Hold::Challenge {
                token: "t".into(),
                until: Some(now_ms() + 30),
            },
        );
        let waited = tokio::time::timeout(Duration::from_secs(2), gates.wait(&conv(), 0, &token))
            .await
            .unwrap();
        assert_eq!(waited, Some(Release::Resume));
        assert!(!gates.is_held(&conv()));
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_wait() {
        let gates = ConversationGates::new();
        let token = CancellationToken::new();
        gates.hold(
            &conv(),
            Hold::Verification {
                untrusted: vec!["a".into()],
            },
        );
        token.cancel();
        assert_eq!(gates.wait(&conv(), 0, &token).await, None);
        assert!(gates.is_held(&conv()));
    }
}
