//! HTTP and WebSocket handlers for the Relay server.
//!
//! Producers push a stream either as a streaming request body or over a
//! WebSocket; consumers attach over a WebSocket and receive every chunk as a
//! binary frame.

use crate::config::Config;
use crate::metrics::{self, roles, ConnectionMetricsGuard};
use crate::relay::{self, RelayError};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use relay_core::{stream_topic, Broker};
use relay_transport::{websocket, BodySource, ByteSink, ConnectionId, TransportError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The stream broker.
    pub broker: Broker,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            broker: Broker::with_config(config.broker.clone()),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let publish_path = format!("{}/:app/:stream", state.config.routes.publish_prefix);
    let subscribe_path = format!("{}/:app/:stream", state.config.routes.subscribe_prefix);

    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        tracing::debug_span!(
            "http.request",
            method = %request.method(),
            uri = %request.uri(),
        )
    });

    let mut router = Router::new()
        .route(&publish_path, get(publish_ws).post(publish_body))
        .route(&subscribe_path, get(subscribe_ws))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler));

    // Player page and assets for everything the relay routes don't claim.
    if let Some(dir) = &state.config.routes.static_dir {
        let dir = shellexpand::tilde(dir).into_owned();
        debug!(dir = %dir, "Serving static files");
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(trace_layer).with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Relay server listening on {}", addr);
    info!(
        "Publish endpoint: http://{}{}/<app>/<stream>",
        addr, config.routes.publish_prefix
    );
    info!(
        "Subscribe endpoint: ws://{}{}/<app>/<stream>",
        addr, config.routes.subscribe_prefix
    );

    let state = Arc::new(AppState::new(config));
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Relay server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Broker statistics with per-topic subscriber counts.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.broker.stats();
    let topics: BTreeMap<String, usize> = state
        .broker
        .topic_names()
        .into_iter()
        .map(|topic| {
            let count = state.broker.subscriber_count(&topic);
            (topic, count)
        })
        .collect();

    Json(serde_json::json!({
        "topic_count": stats.topic_count,
        "subscriber_count": stats.subscriber_count,
        "total_subscriptions": stats.total_subscriptions,
        "topics": topics,
    }))
}

fn bad_request(message: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.to_string() })),
    )
        .into_response()
}

/// Ingest a stream as a (chunked) request body.
async fn publish_body(
    State(state): State<Arc<AppState>>,
    Path((app, stream)): Path<(String, String)>,
    body: Body,
) -> Response {
    let topic = match stream_topic(&app, &stream) {
        Ok(topic) => topic,
        Err(e) => return bad_request(e),
    };

    let _metrics_guard = ConnectionMetricsGuard::new(roles::PUBLISHER);
    let connection = ConnectionId::generate();
    debug!(connection = %connection, topic = %topic, "Body publisher connected");

    let mut source = BodySource::new(body);
    match relay::publish(&state.broker, &topic, &mut source).await {
        Ok(summary) => {
            debug!(
                connection = %connection,
                topic = %topic,
                chunks = summary.chunks,
                bytes = summary.bytes,
                "Body publisher finished"
            );
            Json(serde_json::json!({
                "topic": topic,
                "chunks": summary.chunks,
                "bytes": summary.bytes,
            }))
            .into_response()
        }
        Err(e) => {
            warn!(connection = %connection, topic = %topic, error = %e, "Body stream failed");
            metrics::record_error("body_stream");
            bad_request(e)
        }
    }
}

/// Ingest a stream over a WebSocket.
async fn publish_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((app, stream)): Path<(String, String)>,
) -> Response {
    let topic = match stream_topic(&app, &stream) {
        Ok(topic) => topic,
        Err(e) => return bad_request(e),
    };

    let max = state.config.limits.max_chunk_size;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_publisher(socket, state, topic))
}

async fn handle_publisher(socket: WebSocket, state: Arc<AppState>, topic: String) {
    let _metrics_guard = ConnectionMetricsGuard::new(roles::PUBLISHER);
    let connection = ConnectionId::generate();
    debug!(connection = %connection, topic = %topic, "WebSocket publisher connected");

    let (mut sink, mut source) = websocket::split(socket, state.config.limits.max_chunk_size);
    match relay::publish(&state.broker, &topic, &mut source).await {
        Ok(summary) => debug!(
            connection = %connection,
            topic = %topic,
            chunks = summary.chunks,
            bytes = summary.bytes,
            "WebSocket publisher disconnected"
        ),
        Err(e) => {
            warn!(connection = %connection, topic = %topic, error = %e, "Publisher connection failed");
            metrics::record_error("websocket");
        }
    }

    if let Err(e) = sink.close().await {
        debug!(connection = %connection, error = %e, "Failed to close publisher connection");
    }
}

/// Attach a consumer over a WebSocket.
async fn subscribe_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((app, stream)): Path<(String, String)>,
) -> Response {
    let topic = match stream_topic(&app, &stream) {
        Ok(topic) => topic,
        Err(e) => return bad_request(e),
    };

    let max = state.config.limits.max_chunk_size;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_subscriber(socket, state, topic))
}

async fn handle_subscriber(socket: WebSocket, state: Arc<AppState>, topic: String) {
    let _metrics_guard = ConnectionMetricsGuard::new(roles::SUBSCRIBER);
    let connection = ConnectionId::generate();
    debug!(connection = %connection, topic = %topic, "WebSocket subscriber connected");

    let (sink, source) = websocket::split(socket, state.config.limits.max_chunk_size);
    match relay::serve_subscriber(&state.broker, &topic, sink, source).await {
        Ok(summary) => debug!(
            connection = %connection,
            topic = %topic,
            messages = summary.messages,
            bytes = summary.bytes,
            "WebSocket subscriber disconnected"
        ),
        Err(RelayError::Transport(TransportError::ConnectionClosed)) => {
            debug!(connection = %connection, topic = %topic, "Subscriber went away");
        }
        Err(e) => {
            warn!(connection = %connection, topic = %topic, error = %e, "Subscriber connection failed");
            metrics::record_error("websocket");
        }
    }
}
