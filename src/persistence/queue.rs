//! Bounded background write queue.
//!
//! # Responsibilities
//! - Accept snapshot writes without blocking the caller
//! - Cap queued writes and concurrent store round-trips
//! - Drain pending writes on shutdown
//!
//! # Design Decisions
//! - `try_send` on a bounded channel: a full queue drops the write and logs,
//!   the next transition or snapshot tick rewrites the same key anyway
//! - A semaphore caps concurrent writes so a slow store cannot grow tasks

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::persistence::{KvStore, StoreError, StoreResult};

#[derive(Debug)]
struct WriteJob {
    key: String,
    value: Vec<u8>,
    ttl_secs: u64,
}

/// Handle used to enqueue best-effort writes.
#[derive(Debug, Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<WriteJob>,
}

impl PersistQueue {
    /// Spawn the writer task and return the queue handle.
    pub fn spawn(
        store: Arc<dyn KvStore>,
        capacity: usize,
        max_concurrent_writes: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_writer(
            store,
            rx,
            max_concurrent_writes.max(1),
            shutdown,
        ));
        (Self { tx }, handle)
    }

    /// Queue a write. Fails only when the queue is full or closed.
    pub fn enqueue(&self, key: impl Into<String>, value: Vec<u8>, ttl_secs: u64) -> StoreResult<()> {
        let key = key.into();
        match self.tx.try_send(WriteJob { key, value, ttl_secs }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job))
            | Err(mpsc::error::TrySendError::Closed(job)) => {
                metrics::record_persist_write("dropped");
                Err(StoreError::QueueRejected { key: job.key })
            }
        }
    }

    /// Serialize `value` as JSON and queue it, logging instead of failing.
    pub fn enqueue_json<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let result = serde_json::to_vec(value)
            .map_err(StoreError::from)
            .and_then(|bytes| self.enqueue(key, bytes, ttl_secs));
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Failed to queue state write");
        }
    }
}

async fn run_writer(
    store: Arc<dyn KvStore>,
    mut rx: mpsc::Receiver<WriteJob>,
    max_concurrent: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));

    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => dispatch(&store, &permits, job).await,
                None => break,
            },
            _ = shutdown.recv() => {
                // Flush whatever is already queued, then stop.
                while let Ok(job) = rx.try_recv() {
                    dispatch(&store, &permits, job).await;
                }
                break;
            }
        }
    }

    // Wait for in-flight writes.
    let _ = permits.acquire_many(max_concurrent as u32).await;
    tracing::debug!("Persistence writer stopped");
}

async fn dispatch(store: &Arc<dyn KvStore>, permits: &Arc<Semaphore>, job: WriteJob) {
    let Ok(permit) = permits.clone().acquire_owned().await else {
        return;
    };
    let store = store.clone();
    tokio::spawn(async move {
        match store.set_with_ttl(&job.key, job.value, job.ttl_secs).await {
            Ok(()) => metrics::record_persist_write("ok"),
            Err(e) => {
                metrics::record_persist_write("error");
                tracing::warn!(key = %job.key, error = %e, "State write failed");
            }
        }
        drop(permit);
    });
}
