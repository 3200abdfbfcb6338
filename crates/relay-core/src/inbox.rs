//! Bounded per-subscriber inbox.
//!
//! An inbox is written by broadcasters and read by exactly one drain task.
//! Writes never wait: when the queue is full the [`OverflowPolicy`] decides
//! which message is thrown away. Closing the inbox discards whatever is still
//! queued and wakes the reader, which then observes end-of-stream.

use crate::message::Message;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// Default inbox capacity. Live video favours the freshest chunk, so one slot.
pub const DEFAULT_INBOX_CAPACITY: usize = 1;

/// What to drop when a message arrives at a full inbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message and keep the new one ("latest wins").
    #[default]
    DropOldest,
    /// Keep what is queued and discard the new message.
    DropNewest,
}

/// Outcome of offering a message to an inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// The message was queued.
    Queued,
    /// The message was queued after evicting an undelivered one.
    Replaced,
    /// The inbox was full and the message was discarded.
    DroppedFull,
    /// The inbox is closed and the message was discarded.
    DroppedClosed,
}

impl Delivery {
    /// Whether the message ended up in the inbox.
    #[must_use]
    pub fn is_queued(self) -> bool {
        matches!(self, Delivery::Queued | Delivery::Replaced)
    }

    /// Label used for metrics and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Delivery::Queued => "queued",
            Delivery::Replaced => "replaced",
            Delivery::DroppedFull => "dropped_full",
            Delivery::DroppedClosed => "dropped_closed",
        }
    }
}

#[derive(Debug, Default)]
struct InboxState {
    queue: VecDeque<Arc<Message>>,
    closed: bool,
}

/// A bounded, single-reader message queue.
#[derive(Debug)]
pub struct Inbox {
    state: Mutex<InboxState>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl Inbox {
    /// Create an inbox. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(InboxState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    /// Offer a message. Never waits.
    pub fn push(&self, message: Arc<Message>) -> Delivery {
        let mut state = self.state.lock();
        if state.closed {
            return Delivery::DroppedClosed;
        }

        let outcome = if state.queue.len() < self.capacity {
            state.queue.push_back(message);
            Delivery::Queued
        } else {
            match self.policy {
                OverflowPolicy::DropNewest => return Delivery::DroppedFull,
                OverflowPolicy::DropOldest => {
                    state.queue.pop_front();
                    state.queue.push_back(message);
                    Delivery::Replaced
                }
            }
        };
        drop(state);

        // notify_one leaves a permit if the reader is between its check and its await.
        self.notify.notify_one();
        outcome
    }

    /// Take the next message without waiting.
    pub fn try_pop(&self) -> Option<Arc<Message>> {
        self.state.lock().queue.pop_front()
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the inbox is closed.
    pub async fn pop(&self) -> Option<Arc<Message>> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(message) = state.queue.pop_front() {
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the inbox and discard queued messages.
    ///
    /// Returns the number of discarded messages, or `None` if it was already closed.
    pub fn close(&self) -> Option<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        let discarded = state.queue.len();
        state.queue.clear();
        drop(state);

        self.notify.notify_one();
        Some(discarded)
    }

    /// Whether the inbox has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued messages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The configured overflow policy.
    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}
