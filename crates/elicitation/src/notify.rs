//! # Notification Hub
//!
//! Per-agent notification queues built on `tokio::sync::broadcast`.
//! Delivery is FIFO per agent and at-least-once for live subscribers; a
//! lagging subscriber loses the oldest entries, which are counted as
//! drops.

use dashmap::DashMap;
use serde::Serialize;
use shared_types::event::now_ms;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::debug;

/// Kinds of notifications delivered to agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ElicitationRequest,
    ElicitationResponse,
}

/// JSON-shaped notification delivered on an agent's stream:
/// `{"type": ..., "elicitation_id": ..., "timestamp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub elicitation_id: String,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
}

/// Default per-agent queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Per-agent notification fan-out.
pub struct NotificationHub {
    channels: DashMap<String, broadcast::Sender<Notification>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
    undeliverable: AtomicU64,
}

impl NotificationHub {
    /// Hub with the default queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Hub with a custom per-agent queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
            undeliverable: AtomicU64::new(0),
        }
    }

    /// Subscribe to notifications for an agent.
    #[must_use]
    pub fn subscribe(&self, agent_id: &str) -> NotificationStream {
        let sender = self
            .channels
            .entry(agent_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();

        NotificationStream {
            receiver: sender.subscribe(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Deliver a notification to an agent's subscribers.
    ///
    /// Notifications to agents without subscribers are counted and
    /// dropped.
    pub fn notify(
        &self,
        agent_id: &str,
        notification_type: NotificationType,
        elicitation_id: &str,
    ) {
        let notification = Notification {
            notification_type,
            elicitation_id: elicitation_id.to_string(),
            timestamp_ms: now_ms(),
        };

        let delivered = self
            .channels
            .get(agent_id)
            .map(|sender| sender.send(notification).unwrap_or(0))
            .unwrap_or(0);

        if delivered == 0 {
            self.undeliverable.fetch_add(1, Ordering::Relaxed);
            debug!(agent_id, elicitation_id, "Notification had no subscribers");
        }
    }

    /// Notifications that lagged out of a subscriber's queue.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Notifications sent to agents with no live subscriber.
    #[must_use]
    pub fn undeliverable(&self) -> u64 {
        self.undeliverable.load(Ordering::Relaxed)
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription handle yielding notifications in FIFO order.
pub struct NotificationStream {
    receiver: broadcast::Receiver<Notification>,
    dropped: Arc<AtomicU64>,
}

impl NotificationStream {
    /// Receive the next notification.
    ///
    /// Returns `None` when the hub is gone. Lagged-out entries are counted
    /// as drops and skipped.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.dropped.fetch_add(count, Ordering::Relaxed);
                    debug!(lagged = count, "Subscriber lagged, oldest notifications dropped");
                }
            }
        }
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    self.dropped.fetch_add(count, Ordering::Relaxed);
                }
            }
        }
    }
}

impl Stream for NotificationStream {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Non-blocking check; re-register the waker while empty.
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => return Poll::Ready(Some(notification)),
                Err(broadcast::error::TryRecvError::Closed) => return Poll::Ready(None),
                Err(broadcast::error::TryRecvError::Empty) => {
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    self.dropped.fetch_add(count, Ordering::Relaxed);
                }
            }
        }
    }
}
