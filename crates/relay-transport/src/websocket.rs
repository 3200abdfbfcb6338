//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into a [`ByteSource`] and a
//! [`ByteSink`]. Every binary or text frame is one chunk; control frames are
//! handled by the WebSocket layer and skipped here.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::traits::{ByteSink, ByteSource, TransportError};

/// Default maximum inbound frame size (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Split a WebSocket into its outbound and inbound halves.
#[must_use]
pub fn split(socket: WebSocket, max_message_size: usize) -> (WebSocketSink, WebSocketSource) {
    let (sink, stream) = socket.split();
    (
        WebSocketSink { sink, open: true },
        WebSocketSource {
            stream,
            max_message_size,
            open: true,
        },
    )
}

/// Inbound half of a WebSocket.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
    open: bool,
}

impl WebSocketSource {
    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            warn!(size, max = self.max_message_size, "Message too large");
            return Err(TransportError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ByteSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        if !self.open {
            return Ok(None);
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    // For compatibility, treat text as binary
                    self.check_size(text.len())?;
                    return Ok(Some(Bytes::from(text.into_bytes())));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    self.open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.open = false;
                    return Ok(None);
                }
            }
        }
    }
}

/// Outbound half of a WebSocket.
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
    open: bool,
}

#[async_trait]
impl ByteSink for WebSocketSink {
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        self.sink
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| {
                self.open = false;
                TransportError::SendFailed(e.to_string())
            })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.open, false) {
            return Ok(()); // Already closed
        }

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {e}")))
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
