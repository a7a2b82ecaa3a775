use crate::cache::ActorCache;
use crate::cursor::{CursorFlusher, WorkerCursors, DEFAULT_FLUSH_INTERVAL};
use crate::error::IngestError;
use crate::handler::{event_type, CommitHandler, DEFAULT_SUBJECT_DID};
use crate::store::Store;
use crate::telemetry::{EVENTS_FAILED, EVENTS_HANDLED, WORK_ITEM_DURATION};
use firehose::{Commit, EventSource, EventStream, RecordOpener};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct IngesterConfig {
    pub worker_count: usize,
    /// upper bound on handling all ops of a single commit
    pub work_item_timeout: Duration,
    pub cursor_flush_interval: Duration,
    pub subject_did: String,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            work_item_timeout: Duration::from_secs(30),
            cursor_flush_interval: DEFAULT_FLUSH_INTERVAL,
            subject_did: DEFAULT_SUBJECT_DID.to_string(),
        }
    }
}

/// Reads the upstream commit stream and fans commits out to a fixed pool of
/// workers.
///
/// The reader hands each commit over a zero-capacity channel, so a send only
/// completes once a worker has taken it: slow workers stall the reader, which
/// stalls the socket. A commit is the unit of work, so every op sharing a
/// sequence number is handled by one worker before that number is recorded.
/// Commits are processed out of order across workers, and the persisted
/// cursor is the low watermark of what every worker has finished.
pub struct FirehoseIngester {
    store: Arc<dyn Store>,
    handler: Arc<CommitHandler>,
    source: Arc<dyn EventSource>,
    config: IngesterConfig,
}

impl FirehoseIngester {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<ActorCache>,
        source: Arc<dyn EventSource>,
        opener: RecordOpener,
        config: IngesterConfig,
    ) -> Self {
        let handler = CommitHandler::new(
            store.clone(),
            cache,
            opener,
            config.subject_did.clone(),
        );
        Self {
            store,
            handler: Arc::new(handler),
            source,
            config,
        }
    }

    /// Run until `cancel` fires or the upstream fails.
    ///
    /// Only returns once every worker has exited and the final cursor flush
    /// has run. Cancellation is a clean exit; a dropped or failed stream is
    /// returned as an error.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), IngestError> {
        let cursor = self.store.get_cursor().await.map_err(IngestError::Cursor)?;
        match cursor {
            Some(c) => info!(cursor = c, "resuming from persisted cursor"),
            None => info!("no persisted cursor, starting from the live tip"),
        }
        let mut stream = self.source.connect(cursor.map(|c| c + 1)).await?;

        let worker_count = self.config.worker_count.max(1);
        let cursors = Arc::new(WorkerCursors::new(worker_count));
        let shutdown = cancel.child_token();
        let (tx, rx) = flume::bounded(0);

        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            workers.spawn(worker(
                id,
                rx.clone(),
                self.handler.clone(),
                cursors.clone(),
                self.config.work_item_timeout,
                shutdown.clone(),
            ));
        }
        drop(rx);

        let flusher_stop = CancellationToken::new();
        let flusher = tokio::spawn(
            CursorFlusher::new(
                self.store.clone(),
                cursors,
                cursor,
                self.config.cursor_flush_interval,
            )
            .run(flusher_stop.clone()),
        );
        info!(workers = worker_count, "ingester started");

        let result = read_loop(&mut *stream, &tx, &shutdown).await;
        if let Err(ref e) = result {
            error!(error = %e, "ingester stopping");
        }
        shutdown.cancel();
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task failed");
            }
        }
        flusher_stop.cancel();
        match flusher.await {
            Ok(flushed) => info!(cursor = ?flushed, "ingester stopped"),
            Err(e) => error!(error = %e, "cursor flusher task failed"),
        }
        result
    }
}

async fn read_loop(
    stream: &mut dyn EventStream,
    tx: &flume::Sender<Commit>,
    cancel: &CancellationToken,
) -> Result<(), IngestError> {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = stream.next_commit() => next?,
        };
        let Some(commit) = next else {
            return Err(IngestError::StreamEnded);
        };
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = tx.send_async(commit) => {
                if sent.is_err() {
                    return Err(IngestError::WorkersGone);
                }
            }
        }
    }
}

async fn worker(
    id: usize,
    rx: flume::Receiver<Commit>,
    handler: Arc<CommitHandler>,
    cursors: Arc<WorkerCursors>,
    timeout: Duration,
    cancel: CancellationToken,
) {
    debug!(worker = id, "worker started");
    loop {
        let commit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = rx.recv_async() => match received {
                Ok(commit) => commit,
                Err(_) => break,
            },
        };

        if tokio::time::timeout(timeout, handle_commit(id, &handler, &commit))
            .await
            .is_err()
        {
            warn!(worker = id, seq = commit.seq, ops = commit.ops.len(), ?timeout, "commit handling timed out");
            metrics::counter!(EVENTS_FAILED, "reason" => "timeout").increment(1);
        }
        // only once every op of the commit is done
        cursors.record(id, commit.seq);
    }
    debug!(worker = id, "worker stopped");
}

/// Handle the ops of one commit in order. A failed op is logged and counted
/// and does not stop the ones after it.
async fn handle_commit(id: usize, handler: &CommitHandler, commit: &Commit) {
    for event in &commit.ops {
        let kind = event_type(event);
        let t0 = Instant::now();
        match handler.handle(event).await {
            Ok(()) => {
                metrics::counter!(EVENTS_HANDLED, "type" => kind).increment(1);
            }
            Err(e) if e.is_integrity() => {
                error!(worker = id, seq = event.seq, did = %event.did, collection = %event.collection, rkey = %event.rkey, error = %e, "record failed verification");
                metrics::counter!(EVENTS_FAILED, "reason" => "integrity").increment(1);
            }
            Err(e) => {
                warn!(worker = id, seq = event.seq, did = %event.did, collection = %event.collection, rkey = %event.rkey, error = %e, "failed to handle event");
                metrics::counter!(EVENTS_FAILED, "reason" => "error").increment(1);
            }
        }
        metrics::histogram!(WORK_ITEM_DURATION, "type" => kind).record(t0.elapsed().as_secs_f64());
    }
}
