//! In-memory transport.
//!
//! A bounded channel pair standing in for a connection, for tests and for
//! embedding the relay in-process.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{ByteSink, ByteSource, TransportError};

/// Create a connected sink/source pair holding up to `capacity` chunks.
#[must_use]
pub fn channel(capacity: usize) -> (MemorySink, MemorySource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MemorySink { tx: Some(tx) }, MemorySource { rx })
}

/// Writing end of an in-memory connection.
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl ByteSink for MemorySink {
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(data)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Reading end of an in-memory connection.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_channel_roundtrip() {
        let (mut sink, mut source) = channel(4);
        sink.send(Bytes::from_static(b"one")).await.unwrap();
        sink.send(Bytes::from_static(b"two")).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(source.recv().await.unwrap().unwrap(), "one");
        assert_eq!(source.recv().await.unwrap().unwrap(), "two");
        assert!(source.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (mut sink, _source) = channel(1);
        sink.close().await.unwrap();
        assert!(!sink.is_open());
        assert!(matches!(
            sink.send(Bytes::from_static(b"x")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_after_source_dropped_fails() {
        let (mut sink, source) = channel(1);
        drop(source);
        assert!(!sink.is_open());
        assert!(sink.send(Bytes::from_static(b"x")).await.is_err());
    }
}
