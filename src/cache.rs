use crate::snapshot::Snapshot;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// One published snapshot together with its wire encoding.
#[derive(Debug)]
pub struct CachedSnapshot {
    pub sequence: u64,
    pub published_at_unix: i64,
    pub snapshot: Arc<Snapshot>,
    pub wire: Arc<str>,
}

/// Single-slot holder for the latest snapshot. The collection loop is the only writer.
pub struct SnapshotCache {
    slot: RwLock<Arc<CachedSnapshot>>,
}

impl SnapshotCache {
    /// Starts out holding `placeholder` under sequence 0 until the first publish.
    pub fn new(placeholder: Snapshot) -> Result<Self, serde_json::Error> {
        let wire = encode(&placeholder)?;
        Ok(Self {
            slot: RwLock::new(Arc::new(CachedSnapshot {
                sequence: 0,
                published_at_unix: 0,
                snapshot: Arc::new(placeholder),
                wire,
            })),
        })
    }

    /// Encodes outside the lock, then swaps the slot. Returns what was published.
    pub async fn publish(&self, snapshot: Snapshot) -> Result<Arc<CachedSnapshot>, serde_json::Error> {
        let wire = encode(&snapshot)?;
        let mut guard = self.slot.write().await;
        let entry = Arc::new(CachedSnapshot {
            sequence: guard.sequence + 1,
            published_at_unix: now_unix(),
            snapshot: Arc::new(snapshot),
            wire,
        });
        *guard = entry.clone();
        Ok(entry)
    }

    pub async fn current(&self) -> Arc<str> {
        self.slot.read().await.wire.clone()
    }

    pub async fn latest(&self) -> Arc<CachedSnapshot> {
        self.slot.read().await.clone()
    }
}

fn encode(snapshot: &Snapshot) -> Result<Arc<str>, serde_json::Error> {
    serde_json::to_string_pretty(snapshot).map(Arc::from)
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
