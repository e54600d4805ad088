//! Consumer side of the two endpoints: a reconnecting stream watcher and a one-shot poll.

use futures_util::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

/// Pause before resubscribing after the stream closes or fails.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("poll endpoint answered {0}")]
    Status(reqwest::StatusCode),
}

/// Hands every received snapshot to `on_snapshot`, resubscribing after
/// [`RECONNECT_DELAY`] until shutdown is signalled.
pub async fn watch_stream<F>(url: &str, mut shutdown: watch::Receiver<bool>, mut on_snapshot: F)
where
    F: FnMut(&str),
{
    loop {
        match watch_once(url, &mut shutdown, &mut on_snapshot).await {
            Ok(()) => info!(url, "stream closed"),
            Err(err) => warn!(url, error = %err, "stream connection failed"),
        }
        if *shutdown.borrow() {
            break;
        }

        info!(
            delay_secs = RECONNECT_DELAY.as_secs(),
            "reconnecting to snapshot stream"
        );
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

async fn watch_once<F>(
    url: &str,
    shutdown: &mut watch::Receiver<bool>,
    on_snapshot: &mut F,
) -> Result<(), ClientError>
where
    F: FnMut(&str),
{
    let (mut ws, _) = connect_async(url).await?;
    info!(url, "subscribed to snapshot stream");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = ws.close(None).await;
                return Ok(());
            }
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => on_snapshot(&text),
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }
}

pub async fn poll_once(url: &str) -> Result<String, ClientError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("hwmond/", env!("CARGO_PKG_VERSION")))
        .timeout(POLL_TIMEOUT)
        .build()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Status(status));
    }
    Ok(response.text().await?)
}
