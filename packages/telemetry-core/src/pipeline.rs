//! Frame pipeline: the single consumer of the broker's inbound frames.
//!
//! Each frame is normalized once, then handed to the live fan-out and to the
//! history writer. The two paths are independent: fan-out never waits on a
//! subscriber, and the store is written by its own task through a bounded
//! queue, so a slow or failing store degrades history but not live delivery.
//! Both paths see records in frame arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::events::Broadcaster;
use crate::normalize::MessageNormalizer;
use crate::record::{NormalizedRecord, RawFrame};
use crate::runtime::TaskSpawner;
use crate::store::TelemetryStore;

/// Running counters for the pipeline.
#[derive(Default)]
pub struct PipelineStats {
    received: AtomicU64,
    stored: AtomicU64,
    store_failures: AtomicU64,
    history_dropped: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub received: u64,
    pub stored: u64,
    pub store_failures: u64,
    pub history_dropped: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            history_dropped: self.history_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the running pipeline tasks.
pub struct TelemetryPipeline {
    stats: Arc<PipelineStats>,
    finished: CancellationToken,
}

impl TelemetryPipeline {
    /// Spawns the normalizer task and the store writer.
    ///
    /// The pipeline runs until `frames` is closed (the broker session task
    /// has exited), then drains the history queue and finishes.
    pub fn start<S: TaskSpawner>(
        frames: mpsc::Receiver<RawFrame>,
        normalizer: Arc<MessageNormalizer>,
        broadcaster: Broadcaster,
        store: Arc<dyn TelemetryStore>,
        writer_buffer: usize,
        spawner: &S,
    ) -> Self {
        let stats = Arc::new(PipelineStats::default());
        let finished = CancellationToken::new();
        let (history_tx, history_rx) = mpsc::channel(writer_buffer.max(1));

        spawner.spawn(run_store_writer(
            history_rx,
            store,
            Arc::clone(&stats),
            finished.clone(),
        ));
        spawner.spawn(run_normalizer(
            frames,
            normalizer,
            broadcaster,
            history_tx,
            Arc::clone(&stats),
        ));

        Self { stats, finished }
    }

    pub fn stats(&self) -> PipelineSnapshot {
        self.stats.snapshot()
    }

    /// Waits until every accepted record has been handed to the store.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }
}

async fn run_normalizer(
    mut frames: mpsc::Receiver<RawFrame>,
    normalizer: Arc<MessageNormalizer>,
    broadcaster: Broadcaster,
    history: mpsc::Sender<Arc<NormalizedRecord>>,
    stats: Arc<PipelineStats>,
) {
    while let Some(frame) = frames.recv().await {
        stats.received.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(normalizer.normalize(frame));

        let delivered = broadcaster.publish(Arc::clone(&record));
        log::trace!(
            "[Pipeline] {} delivered to {} subscriber(s)",
            record.identifier,
            delivered
        );

        match history.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                stats.history_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "[Pipeline] History queue full, record from {} not stored",
                    record.topic
                );
            }
            Err(TrySendError::Closed(_)) => {
                stats.history_dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("[Pipeline] Store writer is gone, record not stored");
            }
        }
    }
    log::info!("[Pipeline] Frame stream closed");
}

async fn run_store_writer(
    mut history: mpsc::Receiver<Arc<NormalizedRecord>>,
    store: Arc<dyn TelemetryStore>,
    stats: Arc<PipelineStats>,
    finished: CancellationToken,
) {
    while let Some(record) = history.recv().await {
        match store.append(record).await {
            Ok(_) => {
                stats.stored.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.store_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("[Store] Append failed: {}", e);
            }
        }
    }
    log::info!("[Pipeline] Store writer drained");
    finished.cancel();
}
