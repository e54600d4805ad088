use crate::broadcast::Broadcaster;
use crate::builder::build_snapshot;
use crate::cache::{CachedSnapshot, SnapshotCache};
use crate::collectors::{SensorSource, SourceError};
use crate::metrics::Metrics;
use crate::snapshot::{OperatingSystemInfo, Snapshot};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("sensor refresh failed: {0}")]
    Source(#[from] SourceError),
    #[error("failed to encode snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("sampling task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CycleError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Serialize(_) => "serialize",
            Self::Join(_) => "join",
        }
    }
}

/// Refresh, build, publish and broadcast, repeated until shutdown.
pub struct Collector {
    source: Arc<Mutex<Box<dyn SensorSource>>>,
    os_info: OperatingSystemInfo,
    cache: Arc<SnapshotCache>,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<Metrics>,
    min_cycle_delay: Duration,
}

impl Collector {
    pub fn new(
        source: Box<dyn SensorSource>,
        os_info: OperatingSystemInfo,
        cache: Arc<SnapshotCache>,
        broadcaster: Arc<Broadcaster>,
        metrics: Arc<Metrics>,
        min_cycle_delay: Duration,
    ) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            os_info,
            cache,
            broadcaster,
            metrics,
            min_cycle_delay,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            min_cycle_delay_ms = self.min_cycle_delay.as_millis() as u64,
            "collection loop started"
        );

        let mut cycle = 0_u64;
        loop {
            cycle += 1;
            if let Err(err) = self.run_cycle(cycle).await {
                self.metrics.inc_cycle_error(err.stage());
                error!(cycle, stage = err.stage(), error = %err, "sampling cycle failed");
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!(cycles = cycle, "shutdown requested, stopping collection loop");
                    break;
                }
                _ = tokio::time::sleep(self.min_cycle_delay) => {}
            }
        }

        let closed = self.broadcaster.close_all().await;
        info!(closed, "subscriber connections closed");
    }

    /// One full cycle. On error nothing is published and the cache keeps its previous entry.
    pub async fn run_cycle(&self, cycle: u64) -> Result<Arc<CachedSnapshot>, CycleError> {
        let started = Instant::now();
        let snapshot = self.sample().await?;
        let entry = self.cache.publish(snapshot).await?;

        let report = self.broadcaster.broadcast_latest(entry.wire.clone()).await;
        let subscribers = self.broadcaster.subscriber_count().await;

        let took = started.elapsed();
        self.metrics
            .observe_publish(&entry.snapshot, entry.published_at_unix, took);
        self.metrics
            .observe_broadcast(report.delivered, report.evicted, subscribers);

        debug!(
            cycle,
            sequence = entry.sequence,
            gpus = entry.snapshot.devices.gpu.len(),
            delivered = report.delivered,
            evicted = report.evicted,
            took_ms = took.as_millis() as u64,
            "snapshot published"
        );
        Ok(entry)
    }

    async fn sample(&self) -> Result<Snapshot, CycleError> {
        let source = self.source.clone();
        let os_info = self.os_info.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            let mut guard = source.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.refresh()?;
            Ok::<_, SourceError>(build_snapshot(os_info, guard.hardware()))
        })
        .await??;
        Ok(snapshot)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{os_info, CountingSource};
    use super::*;

    fn collector(source: CountingSource) -> Collector {
        let cache = SnapshotCache::new(Snapshot::empty(os_info())).unwrap();
        Collector::new(
            Box::new(source),
            os_info(),
            Arc::new(cache),
            Arc::new(Broadcaster::new(Duration::from_millis(200))),
            Metrics::new().unwrap(),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn successful_cycle_publishes_snapshot() {
        let collector = collector(CountingSource::default());
        let entry = collector.run_cycle(1).await.unwrap();

        assert_eq!(entry.sequence, 1);
        let cpu = entry.snapshot.devices.cpu.as_ref().unwrap();
        assert_eq!(cpu.load[0].value, 1.0);
        assert_eq!(collector.cache.latest().await.sequence, 1);
        assert!(collector.cache.current().await.contains("\"Test CPU\""));
    }

    #[tokio::test]
    async fn failed_cycle_keeps_previous_snapshot() {
        let collector = collector(CountingSource::failing_on(vec![2]));

        collector.run_cycle(1).await.unwrap();
        let before = collector.cache.current().await;

        let err = collector.run_cycle(2).await.unwrap_err();
        assert!(matches!(err, CycleError::Source(_)));
        assert_eq!(err.stage(), "source");
        assert_eq!(collector.cache.latest().await.sequence, 1);
        assert_eq!(collector.cache.current().await, before);

        let entry = collector.run_cycle(3).await.unwrap();
        assert_eq!(entry.sequence, 2);
        assert_eq!(entry.snapshot.devices.cpu.as_ref().unwrap().load[0].value, 3.0);
    }

    #[tokio::test]
    async fn loop_broadcasts_until_shutdown_then_hangs_up() {
        let collector = collector(CountingSource::failing_on(vec![1]));
        let broadcaster = collector.broadcaster.clone();
        let (_, mut rx) = broadcaster.subscribe().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(collector.run(shutdown_rx));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.contains("\"value\": 2.0"));
        assert!(second.contains("\"value\": 3.0"));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        while rx.recv().await.is_some() {}
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }
}
