//! Messages carried from a publisher to the subscribers of a topic.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in nanoseconds since the UNIX epoch.
///
/// Returns 0 if the system clock is set before the epoch.
#[must_use]
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// A published chunk.
///
/// One message is built per topic per broadcast and shared behind an `Arc`
/// by every recipient, so fields are read-only after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    data: Bytes,
    created_at: u64,
}

impl Message {
    /// Create a new message stamped with the current time.
    #[must_use]
    pub fn new(topic: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::with_timestamp(topic, data, now_nanos())
    }

    /// Create a message with an explicit creation timestamp (nanoseconds).
    #[must_use]
    pub fn with_timestamp(topic: impl Into<String>, data: impl Into<Bytes>, created_at: u64) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
            created_at,
        }
    }

    /// The topic this message was published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The payload. Cloning the returned `Bytes` does not copy the buffer.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Creation time in nanoseconds since the UNIX epoch.
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
