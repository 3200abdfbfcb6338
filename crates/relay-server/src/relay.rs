//! Relay loops between connections and the broker.
//!
//! A publisher loop reads chunks from a producer and broadcasts them. A
//! subscriber loop attaches to the broker and forwards its inbox to a
//! consumer until either the consumer goes away or the subscriber is
//! destroyed.

use crate::metrics;
use relay_core::{Broker, BrokerError, Subscriber};
use relay_transport::{ByteSink, ByteSource, TransportError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, trace};

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The broker could not attach a subscriber.
    #[error("Attach failed: {0}")]
    Attach(#[from] BrokerError),

    /// The connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Totals of a finished publisher connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
    /// Chunks broadcast.
    pub chunks: u64,
    /// Bytes broadcast.
    pub bytes: u64,
}

/// Totals of a finished subscriber connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    /// Messages written to the consumer.
    pub messages: u64,
    /// Bytes written to the consumer.
    pub bytes: u64,
}

/// Broadcast every chunk of `source` to `topic` until the source closes.
///
/// Empty chunks are skipped.
///
/// # Errors
///
/// Returns the transport error that ended the source, if any.
pub async fn publish<S>(
    broker: &Broker,
    topic: &str,
    source: &mut S,
) -> Result<PublishSummary, TransportError>
where
    S: ByteSource + ?Sized,
{
    let mut summary = PublishSummary::default();

    while let Some(chunk) = source.recv().await? {
        if chunk.is_empty() {
            continue;
        }

        let size = chunk.len();
        let start = Instant::now();
        let fanout = broker.broadcast(chunk, [topic]);
        metrics::record_broadcast(size, &fanout, start.elapsed());

        summary.chunks += 1;
        summary.bytes += size as u64;
        trace!(
            topic = %topic,
            bytes = size,
            recipients = fanout.recipients,
            dropped = fanout.dropped,
            "Relayed chunk"
        );
    }

    Ok(summary)
}

/// Detaches the subscriber however the drain loop ends, cancellation included.
struct DetachGuard<'a> {
    broker: &'a Broker,
    subscriber: Arc<Subscriber>,
}

impl Drop for DetachGuard<'_> {
    fn drop(&mut self) {
        self.broker.detach(&self.subscriber);
        metrics::set_active_topics(self.broker.stats().topic_count);
    }
}

/// Attach a subscriber for `topic` and forward its messages to `sink`.
///
/// Runs until the consumer closes `source`, a write to `sink` fails, or the
/// subscriber is destroyed elsewhere. The subscriber is detached and the sink
/// closed on every exit path.
///
/// # Errors
///
/// Returns an error if the attach fails or the connection breaks.
pub async fn serve_subscriber<K, S>(
    broker: &Broker,
    topic: &str,
    mut sink: K,
    mut source: S,
) -> Result<DrainSummary, RelayError>
where
    K: ByteSink,
    S: ByteSource,
{
    let subscriber = broker.attach()?;
    let guard = DetachGuard {
        broker,
        subscriber: Arc::clone(&subscriber),
    };
    broker.subscribe(&subscriber, [topic]);
    metrics::set_active_topics(broker.stats().topic_count);

    let mut summary = DrainSummary::default();
    let outcome = loop {
        tokio::select! {
            biased;

            () = subscriber.closing() => {
                debug!(subscriber = %subscriber.id(), "Subscriber closed by broker");
                break Ok(());
            }

            inbound = source.recv() => match inbound {
                // Consumers have nothing to say; drain and ignore.
                Ok(Some(_)) => {}
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            },

            message = subscriber.recv() => {
                let Some(message) = message else {
                    break Ok(());
                };
                if let Err(e) = sink.send(message.data().clone()).await {
                    break Err(e);
                }
                summary.messages += 1;
                summary.bytes += message.len() as u64;
            }
        }
    };

    drop(guard);
    if let Err(e) = sink.close().await {
        debug!(topic = %topic, error = %e, "Failed to close subscriber connection");
    }

    debug!(
        topic = %topic,
        subscriber = %subscriber.id(),
        messages = summary.messages,
        bytes = summary.bytes,
        "Subscriber drained"
    );
    outcome.map(|()| summary).map_err(RelayError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use relay_transport::memory;
    use std::time::Duration;

    async fn wait_for_count(broker: &Broker, topic: &str, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.subscriber_count(topic) != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscriber count never reached the expected value");
    }

    #[tokio::test]
    async fn test_publish_counts_and_skips_empty_chunks() {
        let broker = Broker::new();
        let sub = broker.attach().unwrap();
        broker.subscribe(&sub, ["live/cam"]);

        let (mut tx, mut source) = memory::channel(8);
        tx.send(Bytes::from_static(b"abc")).await.unwrap();
        tx.send(Bytes::new()).await.unwrap();
        tx.send(Bytes::from_static(b"de")).await.unwrap();
        tx.close().await.unwrap();

        let summary = publish(&broker, "live/cam", &mut source).await.unwrap();
        assert_eq!(summary, PublishSummary { chunks: 2, bytes: 5 });
        // One-slot inbox keeps the freshest chunk.
        assert_eq!(&sub.try_recv().unwrap().data()[..], b"de");
    }

    #[tokio::test]
    async fn test_publisher_to_subscriber_end_to_end() {
        let broker = Arc::new(Broker::new());

        let (consumer_sink, mut consumer_rx) = memory::channel(8);
        let (consumer_tx, consumer_source) = memory::channel(1);
        let drain = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                serve_subscriber(&broker, "live/cam", consumer_sink, consumer_source).await
            })
        };
        wait_for_count(&broker, "live/cam", 1).await;

        let (mut producer_tx, mut producer_source) = memory::channel(8);
        producer_tx.send(Bytes::from_static(b"frame-1")).await.unwrap();
        producer_tx.close().await.unwrap();
        publish(&broker, "live/cam", &mut producer_source).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), consumer_rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received, "frame-1");

        // Consumer hangs up: the subscriber is detached.
        drop(consumer_tx);
        let summary = drain.await.unwrap().unwrap();
        assert_eq!(summary.messages, 1);
        assert_eq!(broker.subscriber_count("live/cam"), 0);
        assert_eq!(broker.stats().subscriber_count, 0);
        assert!(!broker.topic_exists("live/cam"));

        // Sink was closed on the way out.
        assert!(consumer_rx.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_detaches() {
        let broker = Arc::new(Broker::new());
        let (consumer_sink, consumer_rx) = memory::channel(1);
        let (_consumer_tx, consumer_source) = memory::channel(1);
        drop(consumer_rx);

        let drain = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                serve_subscriber(&broker, "live/cam", consumer_sink, consumer_source).await
            })
        };
        wait_for_count(&broker, "live/cam", 1).await;

        broker.broadcast(vec![1, 2, 3], ["live/cam"]);
        let result = drain.await.unwrap();
        assert!(matches!(
            result,
            Err(RelayError::Transport(TransportError::ConnectionClosed))
        ));
        assert_eq!(broker.stats().subscriber_count, 0);
    }

    #[tokio::test]
    async fn test_aborted_drain_still_detaches() {
        let broker = Arc::new(Broker::new());
        let (consumer_sink, _consumer_rx) = memory::channel(1);
        let (_consumer_tx, consumer_source) = memory::channel(1);

        let drain = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                serve_subscriber(&broker, "live/cam", consumer_sink, consumer_source).await
            })
        };
        wait_for_count(&broker, "live/cam", 1).await;

        drain.abort();
        let _ = drain.await;
        assert_eq!(broker.subscriber_count("live/cam"), 0);
        assert_eq!(broker.stats().subscriber_count, 0);
    }
}
