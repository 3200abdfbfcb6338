//! HTTP request body transport.
//!
//! Lets a producer push a stream with a single long-running chunked upload
//! (`curl -T - http://host/publish/app/stream`). The body is inbound only.

use async_trait::async_trait;
use axum::body::{Body, BodyDataStream};
use bytes::Bytes;
use futures_util::StreamExt;

use crate::traits::{ByteSource, TransportError};

/// Inbound chunks of a streaming request body.
pub struct BodySource {
    stream: BodyDataStream,
}

impl BodySource {
    /// Wrap a request body.
    #[must_use]
    pub fn new(body: Body) -> Self {
        Self {
            stream: body.into_data_stream(),
        }
    }
}

#[async_trait]
impl ByteSource for BodySource {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_body_source_yields_chunks_then_none() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
        ];
        let body = Body::from_stream(futures_util::stream::iter(chunks));
        let mut source = BodySource::new(body);

        assert_eq!(source.recv().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(source.recv().await.unwrap().unwrap(), Bytes::from_static(b"def"));
        assert!(source.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_body_source_reports_stream_error() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))];
        let body = Body::from_stream(futures_util::stream::iter(chunks));
        let mut source = BodySource::new(body);

        assert!(matches!(
            source.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }
}
