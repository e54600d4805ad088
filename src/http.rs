use crate::broadcast::Broadcaster;
use crate::cache::SnapshotCache;
use crate::metrics::Metrics;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct PollState {
    pub cache: Arc<SnapshotCache>,
    pub metrics: Arc<Metrics>,
}

/// Serves the latest snapshot on `GET <poll_path>`; every other request is a plain 404.
/// HEAD gets its own route since `get` would otherwise answer it too.
pub fn poll_router(cache: Arc<SnapshotCache>, metrics: Arc<Metrics>, poll_path: &str) -> Router {
    Router::new()
        .route(
            poll_path,
            get(poll_handler).head(not_found).fallback(not_found),
        )
        .fallback(not_found)
        .with_state(PollState { cache, metrics })
}

/// Upgrades any path to a snapshot stream.
pub fn stream_router(broadcaster: Arc<Broadcaster>) -> Router {
    Router::new().fallback(stream_upgrade).with_state(broadcaster)
}

pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Runs `app` on an already bound listener until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    endpoint: &'static str,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(endpoint, addr = %addr, "listening");
    }

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    });
    if let Err(err) = server.await {
        error!(endpoint, error = %err, "server error");
    }
}

async fn poll_handler(State(state): State<PollState>) -> Response {
    state.metrics.inc_poll_request();
    let wire = state.cache.current().await;

    let mut response = Response::new(Body::from(wire.to_string()));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(CONTENT_TYPE, "text/plain")],
        "Not Found",
    )
        .into_response()
}

async fn stream_upgrade(
    State(broadcaster): State<Arc<Broadcaster>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_subscriber(socket, broadcaster))
}

/// Pushes every snapshot published after the subscriber joined. Incoming frames are only
/// read to notice the peer going away.
async fn serve_subscriber(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let (id, mut queue) = broadcaster.subscribe().await;
    let (mut sender, mut receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(wire) = queue.recv().await {
            if sender.send(Message::Text(wire.to_string())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    broadcaster.unsubscribe(id).await;
    debug!(subscriber = id, "stream connection finished");
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    metrics.inc_scrape_count();
    match metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}
