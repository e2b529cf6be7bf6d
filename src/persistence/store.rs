//! Memento Store
//!
//! Persists one memento per managed object under `<kind>/<id>`. Deltas are
//! the hot path: each changed object is written through a keyed queue, so
//! writes for one id apply in submission order while different ids proceed
//! in parallel. Checkpoints rewrite every object of the covered kinds and
//! delete records the snapshot no longer contains.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;

use super::memento::{Manifest, ObjectKind, ObjectMemento};
use crate::config::PersistenceConfig;
use crate::error::{Error, Result};
use crate::store::{keys, with_timeout, KeyedWriteQueue, ObjectStore, WriteTicket};

/// A record that could not be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub key: String,
    /// Object id, when the key or header names one
    pub id: Option<String>,
    pub reason: String,
}

/// Everything readable from the store, plus what was not
#[derive(Debug, Clone, Default)]
pub struct LoadedSnapshot {
    /// Every object whose header could be read
    pub manifest: Manifest,
    /// Every object that decoded in full
    pub mementos: Vec<ObjectMemento>,
    pub failures: Vec<LoadFailure>,
}

/// Checkpoint and delta persistence of object mementos
pub struct MementoStore {
    store: Arc<dyn ObjectStore>,
    queue: KeyedWriteQueue,
    write_timeout: Duration,
    writes_enabled: AtomicBool,
}

impl MementoStore {
    /// Create a memento store over `store`. Writes start enabled.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: &PersistenceConfig,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue: KeyedWriteQueue::new(
                "mementos",
                config.max_concurrent_writes,
                config.queue_capacity,
            ),
            write_timeout,
            writes_enabled: AtomicBool::new(true),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Allow deltas and checkpoints
    pub fn enable_write_access(&self) {
        if !self.writes_enabled.swap(true, Ordering::SeqCst) {
            tracing::debug!("Memento write access enabled");
        }
    }

    /// Refuse further writes, then wait for queued writes to drain
    pub async fn disable_write_access(&self, timeout: Duration) -> Result<()> {
        if self.writes_enabled.swap(false, Ordering::SeqCst) {
            tracing::debug!("Memento write access disabled");
        }
        self.queue.wait_for_writes_completed(timeout).await
    }

    pub fn is_write_enabled(&self) -> bool {
        self.writes_enabled.load(Ordering::SeqCst)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_write_enabled() {
            Ok(())
        } else {
            Err(Error::InvalidState(
                "memento writes are disabled on this node".into(),
            ))
        }
    }

    async fn submit_put(&self, memento: &ObjectMemento) -> Result<WriteTicket> {
        keys::validate_id(&memento.id)?;
        let key = memento.key();
        let value = Bytes::from(memento.encode()?);
        let store = Arc::clone(&self.store);
        let timeout = self.write_timeout;
        let job_key = key.clone();

        self.queue
            .submit(&key, async move {
                with_timeout(&job_key, timeout, store.put(&job_key, value)).await
            })
            .await
    }

    async fn submit_delete(&self, key: String) -> Result<WriteTicket> {
        let store = Arc::clone(&self.store);
        let timeout = self.write_timeout;
        let job_key = key.clone();

        self.queue
            .submit(&key, async move {
                with_timeout(&job_key, timeout, store.delete(&job_key)).await
            })
            .await
    }

    /// Wait on every ticket; report the first failure after all complete
    async fn await_tickets(tickets: Vec<WriteTicket>) -> Result<()> {
        let mut first_error = None;
        for result in join_all(tickets.into_iter().map(WriteTicket::wait)).await {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write changed objects and delete removed ids
    pub async fn delta(&self, changed: &[ObjectMemento], removed_ids: &[String]) -> Result<()> {
        self.ensure_writable()?;
        if changed.is_empty() && removed_ids.is_empty() {
            return Ok(());
        }

        let mut tickets = Vec::with_capacity(changed.len() + removed_ids.len());
        for memento in changed {
            tickets.push(self.submit_put(memento).await?);
        }
        for id in removed_ids {
            keys::validate_id(id)?;
            // Removal does not know the kind; clear the id from every namespace
            for kind in ObjectKind::ALL {
                tickets.push(self.submit_delete(kind.key(id)).await?);
            }
        }

        Self::await_tickets(tickets).await?;
        tracing::debug!(
            "Persisted delta: {} changed, {} removed",
            changed.len(),
            removed_ids.len()
        );
        Ok(())
    }

    /// Write a full snapshot of every kind
    pub async fn checkpoint(&self, objects: &[ObjectMemento]) -> Result<()> {
        self.write_checkpoint(objects, &ObjectKind::ALL, &[]).await
    }

    /// Write a full snapshot of every kind, leaving `retained` keys in
    /// place alongside it
    pub async fn checkpoint_retaining(
        &self,
        objects: &[ObjectMemento],
        retained: &[String],
    ) -> Result<()> {
        self.write_checkpoint(objects, &ObjectKind::ALL, retained).await
    }

    /// Write a full snapshot of the given kinds, replacing all prior
    /// records of those kinds
    pub async fn checkpoint_kinds(
        &self,
        objects: &[ObjectMemento],
        kinds: &[ObjectKind],
    ) -> Result<()> {
        self.write_checkpoint(objects, kinds, &[]).await
    }

    async fn write_checkpoint(
        &self,
        objects: &[ObjectMemento],
        kinds: &[ObjectKind],
        retained: &[String],
    ) -> Result<()> {
        self.ensure_writable()?;

        if let Some(stray) = objects.iter().find(|m| !kinds.contains(&m.kind)) {
            return Err(Error::InvalidState(format!(
                "checkpoint of {:?} contains {} {}",
                kinds, stray.kind, stray.id
            )));
        }

        let mut tickets = Vec::with_capacity(objects.len());
        for memento in objects {
            tickets.push(self.submit_put(memento).await?);
        }

        let keep: HashSet<String> = objects
            .iter()
            .map(ObjectMemento::key)
            .chain(retained.iter().cloned())
            .collect();
        let mut removed = 0usize;
        for kind in kinds {
            for key in self.list_kind(*kind).await? {
                if !keep.contains(&key) {
                    tickets.push(self.submit_delete(key).await?);
                    removed += 1;
                }
            }
        }

        Self::await_tickets(tickets).await?;
        tracing::info!(
            "Checkpoint written: {} objects, {} stale records removed",
            objects.len(),
            removed
        );
        Ok(())
    }

    async fn list_kind(&self, kind: ObjectKind) -> Result<Vec<String>> {
        let prefix = kind.prefix();
        with_timeout(prefix, self.write_timeout, self.store.list(prefix)).await
    }

    async fn list_all(&self) -> Result<Vec<String>> {
        let mut all = Vec::new();
        for kind in ObjectKind::ALL {
            all.extend(self.list_kind(kind).await?);
        }
        Ok(all)
    }

    async fn fetch_all(&self, object_keys: &[String]) -> Result<Vec<(String, Bytes)>> {
        let reads = object_keys.iter().map(|key| async move {
            let value = with_timeout(key, self.write_timeout, self.store.get(key)).await?;
            Ok::<_, Error>(value.map(|bytes| (key.clone(), bytes)))
        });

        let mut values = Vec::with_capacity(object_keys.len());
        for result in join_all(reads).await {
            // Keys deleted between list and get are skipped
            if let Some(entry) = result? {
                values.push(entry);
            }
        }
        Ok(values)
    }

    /// Whether any memento exists in the store
    pub async fn has_persisted_state(&self) -> Result<bool> {
        for kind in ObjectKind::ALL {
            if !self.list_kind(kind).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// List id to type of every persisted object, decoding headers only
    pub async fn load_manifest(&self) -> Result<Manifest> {
        let object_keys = self.list_all().await?;
        let mut manifest = Manifest::new();
        for (key, bytes) in self.fetch_all(&object_keys).await? {
            let header = ObjectMemento::decode_header(&bytes).map_err(|e| Error::Corrupted {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            check_key_matches(&key, header.kind, &header.id)?;
            manifest.insert(header);
        }
        Ok(manifest)
    }

    /// Load every memento, failing on the first unreadable record
    pub async fn load_all(&self) -> Result<Vec<ObjectMemento>> {
        let object_keys = self.list_all().await?;
        let mut mementos = Vec::with_capacity(object_keys.len());
        for (key, bytes) in self.fetch_all(&object_keys).await? {
            let memento = ObjectMemento::decode(&bytes).map_err(|e| Error::Corrupted {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            check_key_matches(&key, memento.kind, &memento.id)?;
            mementos.push(memento);
        }
        Ok(mementos)
    }

    /// Load everything readable; unreadable records are reported rather
    /// than failing the load. Store unavailability still fails.
    pub async fn load_snapshot(&self) -> Result<LoadedSnapshot> {
        let object_keys = self.list_all().await?;
        let mut snapshot = LoadedSnapshot::default();

        for (key, bytes) in self.fetch_all(&object_keys).await? {
            let key_id = ObjectKind::parse_key(&key).map(|(_, id)| id.to_string());

            let header = match ObjectMemento::decode_header(&bytes) {
                Ok(header) => header,
                Err(e) => {
                    tracing::warn!("Unreadable memento header at {}: {}", key, e);
                    snapshot.failures.push(LoadFailure {
                        key,
                        id: key_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if let Err(e) = check_key_matches(&key, header.kind, &header.id) {
                snapshot.failures.push(LoadFailure {
                    key,
                    id: key_id,
                    reason: e.to_string(),
                });
                continue;
            }

            let id = header.id.clone();
            snapshot.manifest.insert(header);

            match ObjectMemento::decode(&bytes) {
                Ok(memento) => snapshot.mementos.push(memento),
                Err(e) => {
                    tracing::warn!("Unreadable memento body at {}: {}", key, e);
                    snapshot.failures.push(LoadFailure {
                        key,
                        id: Some(id),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            "Loaded {} mementos ({} unreadable)",
            snapshot.mementos.len(),
            snapshot.failures.len()
        );
        Ok(snapshot)
    }

    /// Wait for queued memento writes to drain
    pub async fn wait_for_writes_completed(&self, timeout: Duration) -> Result<()> {
        self.queue.wait_for_writes_completed(timeout).await
    }
}

fn check_key_matches(key: &str, kind: ObjectKind, id: &str) -> Result<()> {
    if kind.key(id) == key {
        Ok(())
    } else {
        Err(Error::Corrupted {
            key: key.to_string(),
            reason: format!("record names {} {}", kind, id),
        })
    }
}
