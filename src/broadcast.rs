use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Outbound messages a subscriber may have queued before a send starts waiting.
const SUBSCRIBER_QUEUE: usize = 4;

pub type SubscriberId = u64;

/// Handle to one streaming connection. The connection's writer task drains the receiving end.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    tx: mpsc::Sender<Arc<str>>,
}

impl Subscriber {
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Registry of live streaming subscribers and fan-out of each published snapshot.
pub struct Broadcaster {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Opens a queue for a new connection and registers it.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.register(Subscriber { id, tx }).await;
        (id, rx)
    }

    async fn register(&self, subscriber: Subscriber) {
        let mut guard = self.subscribers.lock().await;
        guard.insert(subscriber.id, subscriber);
        info!(subscribers = guard.len(), "subscriber connected");
    }

    /// Returns whether the subscriber was still registered. Safe to call repeatedly.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut guard = self.subscribers.lock().await;
        let removed = guard.remove(&id).is_some();
        if removed {
            info!(subscribers = guard.len(), "subscriber disconnected");
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Sends `wire` to every subscriber registered when the pass starts. Closed, failed or
    /// timed-out subscribers are evicted together once the pass is over.
    pub async fn broadcast_latest(&self, wire: Arc<str>) -> BroadcastReport {
        let targets: Vec<Subscriber> = self.subscribers.lock().await.values().cloned().collect();
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let send_timeout = self.send_timeout;
        let sends = targets.iter().map(|subscriber| {
            let wire = wire.clone();
            async move {
                if subscriber.is_closed() {
                    return Some(subscriber.id);
                }
                match tokio::time::timeout(send_timeout, subscriber.tx.send(wire)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(_closed)) => Some(subscriber.id),
                    Err(_elapsed) => {
                        debug!(subscriber = subscriber.id, "subscriber send timed out");
                        Some(subscriber.id)
                    }
                }
            }
        });
        let dead: Vec<SubscriberId> = join_all(sends).await.into_iter().flatten().collect();

        if !dead.is_empty() {
            let mut guard = self.subscribers.lock().await;
            for id in &dead {
                guard.remove(id);
            }
            info!(
                evicted = dead.len(),
                subscribers = guard.len(),
                "evicted dead subscribers"
            );
        }

        BroadcastReport {
            delivered: targets.len() - dead.len(),
            evicted: dead.len(),
        }
    }

    /// Drops every subscriber handle; their writer tasks see the queue close and hang up.
    pub async fn close_all(&self) -> usize {
        let mut guard = self.subscribers.lock().await;
        let count = guard.len();
        guard.clear();
        count
    }
}
