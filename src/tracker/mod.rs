// src/tracker/mod.rs
// Non-blocking usage ingestion: bounded queue, single batching flusher

use crate::db::{Database, SearchRecord, UsageEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Hot paths never wait on disk: past this many queued events new
/// submissions are dropped with a warning.
const QUEUE_CAPACITY: usize = 1000;
const BATCH_SIZE: usize = 10;
const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// One submission to the tracker.
#[derive(Debug, Clone)]
pub enum TrackedEvent {
    Usage(UsageEvent),
    Search(SearchRecord),
}

/// Accepts events from any task and batches them into the store from a
/// single background worker. Submissions are non-blocking; the queue is
/// drained completely on `stop`.
pub struct UsageTracker {
    tx: Mutex<Option<mpsc::Sender<TrackedEvent>>>,
    enabled: AtomicBool,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl UsageTracker {
    /// Spawn the flush worker and return the intake handle.
    pub fn spawn(db: Arc<Database>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = tokio::spawn(flush_worker(db, rx));
        Self {
            tx: Mutex::new(Some(tx)),
            enabled: AtomicBool::new(true),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Submit an event. Never blocks and never panics: a full queue drops
    /// the event with a warning, a stopped tracker discards silently, a
    /// disabled tracker accepts and discards.
    pub fn track(&self, event: TrackedEvent) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("usage event dropped: tracker queue full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Close the intake and wait for the worker to drain the queue.
    /// Idempotent; submissions after stop are discarded.
    pub async fn stop(&self) {
        {
            let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.take();
        }
        let handle = {
            let mut guard = self.worker.lock().await;
            guard.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "tracker worker ended abnormally");
            }
        }
    }
}

async fn flush_worker(db: Arc<Database>, mut rx: mpsc::Receiver<TrackedEvent>) {
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
    let mut batch: Vec<TrackedEvent> = Vec::with_capacity(BATCH_SIZE);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => {
                    batch.push(event);
                    if batch.len() >= BATCH_SIZE {
                        flush(&db, &mut batch);
                    }
                }
                None => {
                    // Intake closed: drain whatever is still queued, then exit.
                    while let Ok(event) = rx.try_recv() {
                        batch.push(event);
                    }
                    flush(&db, &mut batch);
                    break;
                }
            },
            _ = interval.tick() => {
                flush(&db, &mut batch);
            }
        }
    }
    debug!("tracker worker drained and stopped");
}

fn flush(db: &Database, batch: &mut Vec<TrackedEvent>) {
    for event in batch.drain(..) {
        match event {
            TrackedEvent::Usage(usage) => db.record_usage(&usage),
            TrackedEvent::Search(search) => db.record_search(&search),
        }
    }
}
