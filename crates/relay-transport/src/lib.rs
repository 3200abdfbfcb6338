//! # relay-transport
//!
//! Byte stream transports for the Relay live stream server.
//!
//! A connection is seen as two independent halves:
//!
//! - **ByteSource** - inbound chunks; `Ok(None)` is the close notification
//! - **ByteSink** - outbound chunks
//!
//! Splitting lets a relay task wait on inbound traffic and write outbound
//! chunks at the same time.
//!
//! Implementations:
//!
//! - **WebSocket** - axum WebSocket, one frame per chunk
//! - **Body** - a streaming HTTP request body (chunked upload)
//! - **Memory** - in-process channel pair
//!
//! ```rust,ignore
//! use relay_transport::{ByteSink, ByteSource};
//!
//! async fn echo(mut source: impl ByteSource, mut sink: impl ByteSink) {
//!     while let Ok(Some(chunk)) = source.recv().await {
//!         if sink.send(chunk).await.is_err() {
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "body")]
pub mod body;

pub use traits::{ByteSink, ByteSource, ConnectionId, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketSink, WebSocketSource};

#[cfg(feature = "body")]
pub use body::BodySource;
