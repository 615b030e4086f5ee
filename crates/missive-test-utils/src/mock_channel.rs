// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock secure channel for deterministic testing.
//!
//! `MockSecureChannel` implements `SecureChannel` with scripted results and
//! captured requests for assertion in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use missive_core::{ConversationId, SecureChannel, SendError, SendRequest, SendSummary};

/// A scripted secure channel.
///
/// - **script**: results pushed via `push_result()` are returned by `send()`
///   in order. When the script is empty, every recipient succeeds.
/// - **requests**: every request passed to `send()` is captured and
///   retrievable via `requests()`.
pub struct MockSecureChannel {
    script: Arc<Mutex<VecDeque<Result<SendSummary, SendError>>>>,
    requests: Arc<Mutex<Vec<SendRequest>>>,
    notify: Arc<Notify>,
    latency: Mutex<Option<Duration>>,
    in_flight: Mutex<HashMap<ConversationId, usize>>,
    max_in_flight: Mutex<usize>,
}

impl MockSecureChannel {
    /// Create a mock channel that succeeds for everyone.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Notify::new()),
            latency: Mutex::new(None),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: Mutex::new(0),
        }
    }

    /// Queue the result of the next unscripted `send()`.
    pub async fn push_result(&self, result: Result<SendSummary, SendError>) {
        self.script.lock().await.push_back(result);
    }

    /// Queue a failure for the next `send()`.
    pub async fn push_error(&self, error: SendError) {
        self.push_result(Err(error)).await;
    }

    /// Make every `send()` take this long before answering.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = Some(latency);
    }

    /// All requests that were passed to `send()`.
    pub async fn requests(&self) -> Vec<SendRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Most sends that ever overlapped within a single conversation.
    pub async fn max_concurrent_per_conversation(&self) -> usize {
        *self.max_in_flight.lock().await
    }

    /// Wait until at least `count` requests were captured, or `timeout`
    /// passes. Returns whether the count was reached.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.request_count().await >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Default for MockSecureChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureChannel for MockSecureChannel {
    async fn send(&self, request: SendRequest) -> Result<SendSummary, SendError> {
        let conversation = request.conversation_id.clone();
        {
            let mut in_flight = self.in_flight.lock().await;
            let count = in_flight.entry(conversation.clone()).or_insert(0);
            *count += 1;
            let mut max = self.max_in_flight.lock().await;
            *max = (*max).max(*count);
        }

        let latency = *self.latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let recipients = request.recipients.clone();
        self.requests.lock().await.push(request);
        if let Some(count) = self.in_flight.lock().await.get_mut(&conversation) {
            *count -= 1;
        }
        self.notify.notify_waiters();

        match self.script.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(SendSummary {
                succeeded: recipients,
            }),
        }
    }
}
