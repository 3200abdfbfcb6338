//! End-to-end throughput benchmark for Relay.
//!
//! One WebSocket producer pushes fixed-size chunks while N WebSocket
//! consumers count what reaches them, over real network I/O.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const PUBLISH_URL: &str = "ws://127.0.0.1:8080/publish/bench/stream";
const SUBSCRIBE_URL: &str = "ws://127.0.0.1:8080/subscribe/bench/stream";
const CHUNK_SIZE: usize = 1316; // 7 MPEG-TS packets
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
struct Counters {
    connected: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
    received_bytes: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.sent.store(0, Ordering::SeqCst);
        self.received.store(0, Ordering::SeqCst);
        self.received_bytes.store(0, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_subscribers = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("Relay end-to-end throughput benchmark");
    println!("Make sure the server is running: cargo run --release -p relay-server");
    println!();

    run_relay_benchmark(num_subscribers).await;
}

async fn run_relay_benchmark(num_subscribers: usize) {
    println!("{} subscribers, {}B chunks", num_subscribers, CHUNK_SIZE);
    println!("Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(num_subscribers + 1));

    let handles: Vec<_> = (0..num_subscribers)
        .map(|subscriber_id| {
            spawn_subscriber(
                subscriber_id,
                SUBSCRIBE_URL.to_string(),
                Arc::clone(&counters),
                Arc::clone(&barrier),
            )
        })
        .collect();

    // Wait for every subscriber to connect or fail
    barrier.wait().await;
    let connected = counters.connected.load(Ordering::SeqCst);
    println!("{}/{} subscribers connected", connected, num_subscribers);
    if connected == 0 {
        eprintln!("No subscriber could connect; is the server running?");
        return;
    }

    let publisher = {
        let counters = Arc::clone(&counters);
        tokio::spawn(async move {
            if let Err(e) = run_publisher(counters).await {
                eprintln!("Publisher error: {}", e);
            }
        })
    };

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    counters.reset();
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let sent = counters.sent.load(Ordering::SeqCst);
    let received = counters.received.load(Ordering::SeqCst);
    let received_bytes = counters.received_bytes.load(Ordering::SeqCst);

    let expected = sent * connected;
    let delivery_ratio = if expected == 0 {
        0.0
    } else {
        received as f64 / expected as f64
    };

    println!();
    println!("Results");
    println!("  Subscribers:       {:>12}", num_subscribers);
    println!("  Duration:          {:>12.2}s", elapsed);
    println!("  Chunks sent:       {:>12} ({:.0}/s)", sent, sent as f64 / elapsed);
    println!(
        "  Chunks received:   {:>12} ({:.0}/s)",
        received,
        received as f64 / elapsed
    );
    println!(
        "  Egress:            {:>12.2} MiB/s",
        received_bytes as f64 / elapsed / (1024.0 * 1024.0)
    );
    // Below 100% means slow consumers had chunks replaced by fresher ones.
    println!("  Delivery ratio:    {:>12.1}%", delivery_ratio * 100.0);

    publisher.abort();
    for handle in handles {
        handle.abort();
    }
}

/// Connect one subscriber and count what reaches it.
///
/// The barrier is passed whether or not the connect succeeds.
fn spawn_subscriber(
    subscriber_id: usize,
    url: String,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                counters.connected.fetch_add(1, Ordering::SeqCst);
                Some(ws)
            }
            Err(e) => {
                eprintln!("Subscriber {} failed to connect: {}", subscriber_id, e);
                None
            }
        };
        barrier.wait().await;

        if let Some(ws) = ws {
            if let Err(e) = drain_subscriber(ws, &counters).await {
                eprintln!("Subscriber {} error: {}", subscriber_id, e);
            }
        }
    })
}

async fn drain_subscriber(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    counters: &Counters,
) -> Result<(), BoxError> {
    let (_sender, mut receiver) = ws.split();

    while let Some(result) = receiver.next().await {
        if let Message::Binary(data) = result? {
            counters.received.fetch_add(1, Ordering::Relaxed);
            counters
                .received_bytes
                .fetch_add(data.len() as u64, Ordering::Relaxed);
        }
    }
    Ok(())
}

async fn run_publisher(counters: Arc<Counters>) -> Result<(), BoxError> {
    let (ws, _) = connect_async(PUBLISH_URL).await?;
    let (mut sender, _receiver) = ws.split();

    let chunk = Message::Binary(vec![0u8; CHUNK_SIZE]);
    loop {
        sender.send(chunk.clone()).await?;
        counters.sent.fetch_add(1, Ordering::Relaxed);
        // Small yield so subscribers on the same runtime keep draining
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_connect_still_reaches_barrier() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let counters = Arc::new(Counters::default());
        let barrier = Arc::new(Barrier::new(2));
        let handle = spawn_subscriber(
            0,
            format!("ws://{addr}/subscribe/bench/stream"),
            Arc::clone(&counters),
            Arc::clone(&barrier),
        );

        tokio::time::timeout(Duration::from_secs(5), barrier.wait())
            .await
            .expect("barrier never released after a failed connect");
        handle.await.unwrap();
        assert_eq!(counters.connected.load(Ordering::SeqCst), 0);
    }
}
