//! Transport abstraction traits for Relay.
//!
//! These traits define the interface that all transport implementations must
//! provide, allowing the relay loops to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier for a connection, used in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a connection ID unique within this process.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let sequence = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}_{sequence}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An inbound chunk exceeded the configured limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size of the offending chunk.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The inbound half of a connection.
#[async_trait]
pub trait ByteSource: Send {
    /// Receive the next chunk.
    ///
    /// Returns `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The outbound half of a connection.
#[async_trait]
pub trait ByteSink: Send {
    /// Send one chunk.
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Close the connection gracefully. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the sink still accepts data.
    fn is_open(&self) -> bool {
        true
    }
}
