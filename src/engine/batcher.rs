use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::models::change::{ChangeBatch, FileChange};

/// Per-path coalescing buffer with a trailing quiet window.
///
/// Every push replaces the pending entry for its path and restarts the window;
/// the whole buffer is flushed once the window elapses with no new events.
#[derive(Debug)]
pub struct Batcher {
    window: Duration,
    pending: BTreeMap<String, FileChange>,
    deadline: Option<Instant>,
    ids: Arc<AtomicU64>,
}

impl Batcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeMap::new(),
            deadline: None,
            ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Share batch ids with other producers so ids stay unique per process.
    pub fn with_ids(mut self, ids: Arc<AtomicU64>) -> Self {
        self.ids = ids;
        self
    }

    pub fn push(&mut self, change: FileChange) {
        self.pending.insert(change.path.clone(), change);
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drain the buffer into a batch.
    pub fn take(&mut self) -> Option<ChangeBatch> {
        self.deadline = None;
        if self.pending.is_empty() {
            return None;
        }
        let changes: Vec<FileChange> = std::mem::take(&mut self.pending).into_values().collect();
        Some(ChangeBatch::new(self.ids.fetch_add(1, Ordering::Relaxed), changes))
    }

    /// Drive the buffer until `shutdown` fires or `events` closes.
    ///
    /// Neither ending flushes: whatever is still pending is dropped.
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<FileChange>,
        mut shutdown: watch::Receiver<bool>,
        mut on_flush: impl FnMut(ChangeBatch),
    ) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(change) => self.push(change),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(batch) = self.take() {
                        debug!(batch = batch.id, files = batch.len(), "batch flushed");
                        on_flush(batch);
                    }
                }
            }
        }
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "batcher stopped with pending changes");
        }
    }
}
