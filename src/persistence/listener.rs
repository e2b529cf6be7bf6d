//! Periodic Persister
//!
//! Collects object changes reported by the runtime and writes them as
//! deltas every persist period. Changes to the same id are coalesced so
//! only the latest state is written. A full checkpoint, built from a
//! [`MementoSource`], is written every checkpoint interval.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::memento::ObjectMemento;
use super::store::MementoStore;
use crate::error::Result;

/// Supplies the full set of mementos for a checkpoint
///
/// The persister forwards every change and removal it accepts, so a
/// source that tracks them stays as current as the deltas it writes.
#[async_trait]
pub trait MementoSource: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<ObjectMemento>>;

    /// Store keys a checkpoint must leave in place although the snapshot
    /// does not name them
    async fn retained_keys(&self) -> Vec<String> {
        Vec::new()
    }

    async fn record_changed(&self, _memento: &ObjectMemento) {}

    async fn record_removed(&self, _id: &str) {}
}

#[derive(Default)]
struct PendingChanges {
    changed: BTreeMap<String, ObjectMemento>,
    removed: BTreeSet<String>,
}

impl PendingChanges {
    fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    fn len(&self) -> usize {
        self.changed.len() + self.removed.len()
    }

    /// Put back a batch that failed to write, without overriding anything
    /// reported since
    fn requeue(&mut self, failed: PendingChanges) {
        for (id, memento) in failed.changed {
            if !self.removed.contains(&id) {
                self.changed.entry(id).or_insert(memento);
            }
        }
        for id in failed.removed {
            if !self.changed.contains_key(&id) {
                self.removed.insert(id);
            }
        }
    }
}

/// Batches object changes into periodic deltas and checkpoints
pub struct PeriodicPersister {
    mementos: Arc<MementoStore>,
    source: Arc<dyn MementoSource>,
    persist_period: Duration,
    checkpoint_interval: Duration,
    pending: Mutex<PendingChanges>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicPersister {
    pub fn new(
        mementos: Arc<MementoStore>,
        source: Arc<dyn MementoSource>,
        persist_period: Duration,
        checkpoint_interval: Duration,
    ) -> Self {
        Self {
            mementos,
            source,
            persist_period,
            checkpoint_interval,
            pending: Mutex::new(PendingChanges::default()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Record that an object changed
    pub async fn on_changed(&self, memento: ObjectMemento) {
        self.source.record_changed(&memento).await;
        let mut pending = self.pending.lock().await;
        pending.removed.remove(&memento.id);
        pending.changed.insert(memento.id.clone(), memento);
    }

    /// Record that an object was removed
    pub async fn on_removed(&self, id: impl Into<String>) {
        let id = id.into();
        self.source.record_removed(&id).await;
        let mut pending = self.pending.lock().await;
        pending.changed.remove(&id);
        pending.removed.insert(id);
    }

    /// Number of changes waiting to be written
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Write all pending changes now. On failure they stay pending.
    pub async fn flush(&self) -> Result<()> {
        let batch = std::mem::take(&mut *self.pending.lock().await);
        if batch.is_empty() {
            return Ok(());
        }

        let changed: Vec<ObjectMemento> = batch.changed.values().cloned().collect();
        let removed: Vec<String> = batch.removed.iter().cloned().collect();

        if let Err(e) = self.mementos.delta(&changed, &removed).await {
            self.pending.lock().await.requeue(batch);
            return Err(e);
        }
        Ok(())
    }

    /// Flush pending changes, then write a full checkpoint
    pub async fn checkpoint_now(&self) -> Result<()> {
        self.flush().await?;
        let snapshot = self.source.snapshot().await?;
        let retained = self.source.retained_keys().await;
        self.mementos.checkpoint_retaining(&snapshot, &retained).await
    }

    /// Start the background flush loop
    pub async fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut last_checkpoint = Instant::now();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(this.persist_period) => {}
                }

                if !this.mementos.is_write_enabled() {
                    continue;
                }

                if let Err(e) = this.flush().await {
                    tracing::warn!("Failed to persist pending changes: {}", e);
                    continue;
                }

                if last_checkpoint.elapsed() >= this.checkpoint_interval {
                    match this.checkpoint_now().await {
                        Ok(()) => last_checkpoint = Instant::now(),
                        Err(e) => tracing::warn!("Periodic checkpoint failed: {}", e),
                    }
                }
            }
        });

        *self.task.lock().await = Some(handle);
    }

    /// Stop the loop and write anything still pending
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        if self.mementos.is_write_enabled() {
            self.flush().await?;
        }
        Ok(())
    }
}
