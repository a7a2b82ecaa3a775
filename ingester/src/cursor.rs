//! Watermark cursor.
//!
//! Workers finish events out of order, so the only position that is safe to
//! persist is the smallest "last processed" across workers: everything at or
//! below it has been handled. Workers that have not processed anything yet
//! are ignored.

use crate::store::Store;
use crate::telemetry::{FLUSHED_CURSOR, WORKER_CURSOR};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

const UNSET: i64 = -1;

/// Per-worker last-processed sequence numbers.
#[derive(Debug)]
pub struct WorkerCursors {
    slots: Box<[AtomicI64]>,
}

impl WorkerCursors {
    pub fn new(workers: usize) -> Self {
        Self {
            slots: (0..workers).map(|_| AtomicI64::new(UNSET)).collect(),
        }
    }

    pub fn record(&self, worker: usize, seq: i64) {
        if let Some(slot) = self.slots.get(worker) {
            slot.store(seq, Ordering::Release);
            metrics::gauge!(WORKER_CURSOR, "worker" => worker.to_string()).set(seq as f64);
        }
    }

    /// Minimum over workers that have processed something.
    pub fn low_watermark(&self) -> Option<i64> {
        self.slots
            .iter()
            .map(|s| s.load(Ordering::Acquire))
            .filter(|s| *s != UNSET)
            .min()
    }
}

/// Periodically persists the low watermark.
pub struct CursorFlusher {
    store: Arc<dyn Store>,
    cursors: Arc<WorkerCursors>,
    last_flushed: Option<i64>,
    interval: Duration,
}

impl CursorFlusher {
    /// `last_flushed` is the cursor already in the store, if any.
    pub fn new(
        store: Arc<dyn Store>,
        cursors: Arc<WorkerCursors>,
        last_flushed: Option<i64>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            cursors,
            last_flushed,
            interval,
        }
    }

    /// Persist the watermark if it moved forward. Returns the value written.
    ///
    /// A failed write is logged and leaves `last_flushed` alone, so the next
    /// call tries again.
    pub async fn flush(&mut self) -> Option<i64> {
        let watermark = self.cursors.low_watermark()?;
        if self.last_flushed.is_some_and(|last| watermark <= last) {
            return None;
        }
        match self.store.set_cursor(watermark).await {
            Ok(()) => {
                debug!(cursor = watermark, "flushed cursor");
                metrics::gauge!(FLUSHED_CURSOR).set(watermark as f64);
                self.last_flushed = Some(watermark);
                Some(watermark)
            }
            Err(e) => {
                error!(cursor = watermark, error = %e, "failed to flush cursor");
                None
            }
        }
    }

    /// Flush every interval until `stop` fires, then flush once more.
    pub async fn run(mut self, stop: CancellationToken) -> Option<i64> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }
        self.flush().await;
        info!(cursor = ?self.last_flushed, "cursor flusher stopped");
        self.last_flushed
    }
}
