//! Subscriber endpoints.
//!
//! A subscriber is shared between the broker, which offers it messages, and
//! the drain task that forwards those messages to a consumer connection. It
//! is torn down exactly once by [`Subscriber::destroy`]; after that every
//! offer is dropped and the drain side observes end-of-stream.

use crate::inbox::{Delivery, Inbox, OverflowPolicy};
use crate::message::{now_nanos, Message};
use futures_util::Stream;
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace};

/// Number of random bytes in a subscriber id.
const ID_BYTES: usize = 32;

/// Opaque, unique subscriber identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Generate an id from the operating system's secure random source.
    ///
    /// # Errors
    ///
    /// Returns an error if the random source is unavailable.
    pub fn generate() -> Result<Self, rand::Error> {
        let mut bytes = [0u8; ID_BYTES];
        OsRng.try_fill_bytes(&mut bytes)?;
        Ok(Self(hex::encode(bytes)))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A consumer endpoint with a bounded inbox.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    inbox: Inbox,
    /// Mutated only while the broker holds its registry write lock.
    topics: Mutex<BTreeSet<String>>,
    destroyed: AtomicBool,
    closing: CancellationToken,
    created_at: u64,
}

impl Subscriber {
    pub(crate) fn new(id: SubscriberId, inbox_capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            id,
            inbox: Inbox::new(inbox_capacity, policy),
            topics: Mutex::new(BTreeSet::new()),
            destroyed: AtomicBool::new(false),
            closing: CancellationToken::new(),
            created_at: now_nanos(),
        }
    }

    /// The subscriber's id.
    #[must_use]
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Creation time in nanoseconds since the UNIX epoch.
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Whether [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Number of messages waiting in the inbox.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Snapshot of the topics this subscriber belongs to, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    /// Offer a message. A single attempt that never waits.
    ///
    /// Once the subscriber is destroyed every offer is dropped. The inbox
    /// re-checks its closed flag under its own lock, so an offer racing
    /// [`destroy`](Self::destroy) either lands before the close (and is
    /// discarded by it) or is rejected.
    pub fn signal(&self, message: Arc<Message>) -> Delivery {
        if self.is_destroyed() {
            return Delivery::DroppedClosed;
        }
        let outcome = self.inbox.push(message);
        trace!(subscriber = %self.id, outcome = outcome.as_str(), "Signal");
        outcome
    }

    /// Tear the subscriber down.
    ///
    /// Returns `true` for the call that performed the transition and `false`
    /// for every later (or concurrently losing) call.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let discarded = self.inbox.close().unwrap_or_default();
        self.closing.cancel();
        debug!(subscriber = %self.id, discarded, "Subscriber destroyed");
        true
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the subscriber is destroyed.
    pub async fn recv(&self) -> Option<Arc<Message>> {
        if self.is_destroyed() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.closing.cancelled() => None,
            message = self.inbox.pop() => message,
        }
    }

    /// Take the next message without waiting.
    pub fn try_recv(&self) -> Option<Arc<Message>> {
        if self.is_destroyed() {
            return None;
        }
        self.inbox.try_pop()
    }

    /// The inbox as a stream that ends when the subscriber is destroyed.
    pub fn messages(self: &Arc<Self>) -> impl Stream<Item = Arc<Message>> + Send + 'static {
        futures_util::stream::unfold(Arc::clone(self), |subscriber| async move {
            let message = subscriber.recv().await?;
            Some((message, subscriber))
        })
    }

    /// Resolves once the subscriber is destroyed, immediately if it already is.
    pub fn closing(&self) -> WaitForCancellationFuture<'_> {
        self.closing.cancelled()
    }

    pub(crate) fn join_topic(&self, topic: &str) -> bool {
        self.topics.lock().insert(topic.to_string())
    }

    pub(crate) fn leave_topic(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }

    pub(crate) fn take_topics(&self) -> BTreeSet<String> {
        std::mem::take(&mut *self.topics.lock())
    }
}
