//! Background index flushing
//!
//! Each flush request bumps a generation counter and wakes the single worker
//! task. The worker reads the latest generation, snapshots the index, writes
//! it and publishes that generation as completed. Requests arriving while a
//! write is in flight coalesce into the next write.

use crate::index::{write_index, IndexState};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) struct FlushScheduler {
    requested: AtomicU64,
    completed: watch::Sender<u64>,
    wake: Notify,
    closed: AtomicBool,
    flushes: AtomicU64,
    failures: AtomicU64,
}

impl FlushScheduler {
    pub(crate) fn new() -> Self {
        let (completed, _) = watch::channel(0);
        Self {
            requested: AtomicU64::new(0),
            completed,
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Ask for a flush, returning the generation to wait on
    pub(crate) fn request(&self) -> u64 {
        let generation = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        self.wake.notify_one();
        generation
    }

    /// Wait until `generation` and everything before it has been flushed
    pub(crate) async fn wait_for(&self, generation: u64) {
        let mut completed = self.completed.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = completed.wait_for(|done| *done >= generation).await;
    }

    /// Wait for every flush requested so far
    pub(crate) async fn wait_for_all(&self) {
        self.wait_for(self.requested.load(Ordering::SeqCst)).await;
    }

    /// Stop the worker once all outstanding requests are flushed
    pub(crate) fn close(&self) -> u64 {
        // Bump the generation before marking closed so the worker cannot
        // observe `closed` without also seeing this final request
        let generation = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        self.closed.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        generation
    }

    pub(crate) fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub(crate) fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn complete(&self, generation: u64) {
        self.completed.send_replace(generation);
    }

    fn is_drained(&self, completed: u64) -> bool {
        self.closed.load(Ordering::SeqCst) && completed >= self.requested.load(Ordering::SeqCst)
    }
}

/// Spawn the task that writes the index whenever a flush is requested.
///
/// A failed write is logged and counted; the generation is still marked
/// complete so waiters never hang, and the next flush rewrites the whole
/// snapshot.
pub(crate) fn spawn_worker(
    scheduler: Arc<FlushScheduler>,
    index: Arc<Mutex<IndexState>>,
    path: PathBuf,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut completed = 0;
        loop {
            scheduler.wake.notified().await;

            let generation = scheduler.requested.load(Ordering::SeqCst);
            if generation > completed {
                let snapshot = index.lock().await.snapshot();
                match write_index(&path, &snapshot).await {
                    Ok(()) => {
                        scheduler.flushes.fetch_add(1, Ordering::Relaxed);
                        debug!(generation, entries = snapshot.len(), "Flushed cache index");
                    }
                    Err(e) => {
                        scheduler.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(generation, error = %e, path = ?path, "Failed to flush cache index");
                    }
                }
                completed = generation;
                scheduler.complete(generation);
            }

            if scheduler.is_drained(completed) {
                break;
            }
        }
        debug!("Index flush worker stopped");
    })
}
