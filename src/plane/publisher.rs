//! Node Record Publisher
//!
//! Writes this node's heartbeat and reads the plane from the shared store.
//! Node records live at `node/<id>` (bincode), the master pointer at
//! `master` as plain UTF-8 (empty when cleared).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;

use super::record::{MasterChange, NodeRecord, NodeStatus, PlaneDelta, PlaneRecord};
use crate::error::{Error, Result};
use crate::store::{keys, with_timeout, KeyedWriteQueue, ObjectStore, WriteTicket};

/// Collected change-log lines for one delta
type ChangeLines = Arc<Mutex<Vec<String>>>;

/// Publishes node records and reads the plane
pub struct NodeRecordPublisher {
    /// Shared store
    store: Arc<dyn ObjectStore>,
    /// Orders writes per node id
    queue: KeyedWriteQueue,
    /// Bound on every store operation
    timeout: Duration,
}

impl NodeRecordPublisher {
    /// Create a publisher over `store`
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self {
            store,
            queue: KeyedWriteQueue::new("plane", 4, 1024),
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Write or overwrite this node's own record
    pub async fn publish_self(&self, record: NodeRecord) -> Result<()> {
        self.apply_delta(PlaneDelta::new().node(record)).await
    }

    /// Read every node record plus the master pointer.
    ///
    /// Records that vanish between listing and reading are skipped; records
    /// that cannot be decoded are logged and skipped.
    pub async fn read_plane(&self) -> Result<PlaneRecord> {
        let master = with_timeout(keys::MASTER, self.timeout, self.store.get(keys::MASTER)).await?;
        let master_node_id = master.and_then(|bytes| {
            let id = String::from_utf8_lossy(&bytes).trim().to_string();
            if id.is_empty() {
                None
            } else {
                Some(id)
            }
        });

        let node_keys = with_timeout(
            keys::NODE_PREFIX,
            self.timeout,
            self.store.list(keys::NODE_PREFIX),
        )
        .await?;

        let reads = node_keys.iter().map(|key| async move {
            let value = with_timeout(key, self.timeout, self.store.get(key)).await?;
            Ok::<_, Error>((key.as_str(), value))
        });

        let mut plane = PlaneRecord {
            master_node_id,
            ..Default::default()
        };

        for result in join_all(reads).await {
            let (key, value) = result?;
            let Some(bytes) = value else {
                continue;
            };
            match NodeRecord::decode(&bytes) {
                Ok(record) => {
                    if keys::node_id_from_key(key) != Some(record.node_id.as_str()) {
                        tracing::warn!(
                            "Node record at {} names node {}, skipping",
                            key,
                            record.node_id
                        );
                        continue;
                    }
                    plane.nodes.insert(record.node_id.clone(), record);
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable node record {}: {}", key, e);
                }
            }
        }

        Ok(plane)
    }

    /// Merge a delta into the store.
    ///
    /// Node updates are ordered per node id and skipped when the stored
    /// record is newer, so retries and out-of-order deltas converge.
    pub async fn apply_delta(&self, delta: PlaneDelta) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }

        let lines: ChangeLines = Arc::new(Mutex::new(Vec::new()));
        let mut tickets = Vec::new();

        for record in delta.updated_nodes {
            keys::validate_id(&record.node_id)?;
            let key = keys::node(&record.node_id);
            tickets.push(self.submit_node_update(key, record, Arc::clone(&lines)).await?);
        }

        for node_id in delta.removed_node_ids {
            keys::validate_id(&node_id)?;
            let key = keys::node(&node_id);
            tickets.push(self.submit_node_removal(key, node_id, Arc::clone(&lines)).await?);
        }

        if delta.master_change != MasterChange::NoChange {
            tickets.push(
                self.submit_master_change(delta.master_change, Arc::clone(&lines))
                    .await?,
            );
        }

        let mut first_error = None;
        for result in join_all(tickets.into_iter().map(WriteTicket::wait)).await {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        self.append_change_log(lines).await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn submit_node_update(
        &self,
        key: String,
        record: NodeRecord,
        lines: ChangeLines,
    ) -> Result<WriteTicket> {
        let store = Arc::clone(&self.store);
        let timeout = self.timeout;
        let job_key = key.clone();

        self.queue
            .submit(&key, async move {
                with_timeout(&job_key, timeout, async {
                    let existing = match store.get(&job_key).await? {
                        Some(bytes) => NodeRecord::decode(&bytes).ok(),
                        None => None,
                    };

                    if let Some(existing) = &existing {
                        if existing.timestamp_utc > record.timestamp_utc {
                            tracing::trace!(
                                "Skipping older record for node {} ({} < {})",
                                record.node_id,
                                record.timestamp_utc,
                                existing.timestamp_utc
                            );
                            return Ok(());
                        }
                    }

                    store.put(&job_key, Bytes::from(record.encode()?)).await?;

                    let line = match &existing {
                        None => Some(format!(
                            "Node {} created ({})",
                            record.node_id, record.status
                        )),
                        Some(existing)
                            if existing.status != record.status
                                && matches!(
                                    record.status,
                                    NodeStatus::Terminated | NodeStatus::Failed
                                ) =>
                        {
                            Some(format!(
                                "Node {} now {}",
                                record.node_id, record.status
                            ))
                        }
                        _ => None,
                    };
                    if let Some(line) = line {
                        lines.lock().await.push(line);
                    }
                    Ok(())
                })
                .await
            })
            .await
    }

    async fn submit_node_removal(
        &self,
        key: String,
        node_id: String,
        lines: ChangeLines,
    ) -> Result<WriteTicket> {
        let store = Arc::clone(&self.store);
        let timeout = self.timeout;
        let job_key = key.clone();

        self.queue
            .submit(&key, async move {
                with_timeout(&job_key, timeout, async {
                    if store.get(&job_key).await?.is_some() {
                        store.delete(&job_key).await?;
                        lines
                            .lock()
                            .await
                            .push(format!("Node {} removed", node_id));
                    }
                    Ok(())
                })
                .await
            })
            .await
    }

    async fn submit_master_change(
        &self,
        change: MasterChange,
        lines: ChangeLines,
    ) -> Result<WriteTicket> {
        let store = Arc::clone(&self.store);
        let timeout = self.timeout;

        self.queue
            .submit(keys::MASTER, async move {
                with_timeout(keys::MASTER, timeout, async {
                    let current = store
                        .get(keys::MASTER)
                        .await?
                        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
                        .filter(|id| !id.is_empty());

                    match change {
                        MasterChange::NoChange => {}
                        MasterChange::SetMaster(node_id) => {
                            if current.as_deref() != Some(node_id.as_str()) {
                                store
                                    .put(keys::MASTER, Bytes::from(node_id.clone()))
                                    .await?;
                                lines.lock().await.push(format!(
                                    "Master changed from {} to {}",
                                    current.as_deref().unwrap_or("<none>"),
                                    node_id
                                ));
                            }
                        }
                        MasterChange::ClearMaster { expected } => {
                            let matches = match &expected {
                                Some(expected) => current.as_deref() == Some(expected.as_str()),
                                None => current.is_some(),
                            };
                            if matches {
                                store.put(keys::MASTER, Bytes::new()).await?;
                                lines.lock().await.push(format!(
                                    "Master {} cleared",
                                    current.as_deref().unwrap_or("<none>")
                                ));
                            }
                        }
                    }
                    Ok(())
                })
                .await
            })
            .await
    }

    /// Best-effort append to the change log; failures only warn
    async fn append_change_log(&self, lines: ChangeLines) {
        let lines = std::mem::take(&mut *lines.lock().await);
        if lines.is_empty() {
            return;
        }

        let now = Utc::now().to_rfc3339();
        let mut text = String::new();
        for line in &lines {
            tracing::info!("{}", line);
            text.push_str(&format!("{}: {}\n", now, line));
        }

        let store = Arc::clone(&self.store);
        let timeout = self.timeout;
        let result = self
            .queue
            .submit_and_wait(keys::CHANGE_LOG, async move {
                with_timeout(
                    keys::CHANGE_LOG,
                    timeout,
                    store.append(keys::CHANGE_LOG, text.as_bytes()),
                )
                .await
            })
            .await;

        if let Err(e) = result {
            tracing::warn!("Failed to append plane change log: {}", e);
        }
    }

    /// Wait for queued plane writes to drain
    pub async fn wait_for_writes_completed(&self, timeout: Duration) -> Result<()> {
        self.queue.wait_for_writes_completed(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryObjectStore;
    use chrono::{DateTime, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn publisher() -> (Arc<InMemoryObjectStore>, NodeRecordPublisher) {
        let store = Arc::new(InMemoryObjectStore::new());
        let publisher = NodeRecordPublisher::new(store.clone(), Duration::from_secs(1));
        (store, publisher)
    }

    #[tokio::test]
    async fn test_publish_and_read_plane() {
        let (_, publisher) = publisher();
        publisher
            .publish_self(NodeRecord::new("a", NodeStatus::Master, at(0)))
            .await
            .unwrap();
        publisher
            .apply_delta(
                PlaneDelta::new()
                    .node(NodeRecord::new("b", NodeStatus::Standby, at(0)))
                    .set_master("a"),
            )
            .await
            .unwrap();

        let plane = publisher.read_plane().await.unwrap();
        assert_eq!(plane.master_node_id.as_deref(), Some("a"));
        assert_eq!(plane.nodes.len(), 2);
        assert_eq!(plane.nodes["b"].status, NodeStatus::Standby);
    }

    #[tokio::test]
    async fn test_older_record_does_not_overwrite() {
        let (_, publisher) = publisher();
        publisher
            .publish_self(NodeRecord::new("a", NodeStatus::Master, at(10)))
            .await
            .unwrap();
        publisher
            .publish_self(NodeRecord::new("a", NodeStatus::Standby, at(5)))
            .await
            .unwrap();

        let plane = publisher.read_plane().await.unwrap();
        assert_eq!(plane.nodes["a"].status, NodeStatus::Master);
    }

    #[tokio::test]
    async fn test_delta_is_idempotent() {
        let (store, publisher) = publisher();
        let delta = PlaneDelta::new()
            .node(NodeRecord::new("a", NodeStatus::Master, at(1)))
            .node(NodeRecord::new("b", NodeStatus::Standby, at(1)))
            .set_master("a");

        publisher.apply_delta(delta.clone()).await.unwrap();
        let once = publisher.read_plane().await.unwrap();
        let log_once = store.get(keys::CHANGE_LOG).await.unwrap();

        publisher.apply_delta(delta).await.unwrap();
        assert_eq!(publisher.read_plane().await.unwrap(), once);
        assert_eq!(store.get(keys::CHANGE_LOG).await.unwrap(), log_once);
    }

    #[tokio::test]
    async fn test_clear_master_is_conditional() {
        let (_, publisher) = publisher();
        publisher
            .apply_delta(PlaneDelta::new().set_master("b"))
            .await
            .unwrap();
        publisher
            .apply_delta(PlaneDelta::new().clear_master("a"))
            .await
            .unwrap();
        assert_eq!(
            publisher.read_plane().await.unwrap().master_node_id.as_deref(),
            Some("b")
        );
    }

    #[tokio::test]
    async fn test_change_log_records_transitions() {
        let (store, publisher) = publisher();
        publisher
            .apply_delta(
                PlaneDelta::new()
                    .node(NodeRecord::new("a", NodeStatus::Master, at(0)))
                    .set_master("a"),
            )
            .await
            .unwrap();
        publisher
            .publish_self(NodeRecord::new("a", NodeStatus::Terminated, at(1)))
            .await
            .unwrap();
        publisher
            .apply_delta(PlaneDelta::new().remove("a"))
            .await
            .unwrap();

        let log = store.get(keys::CHANGE_LOG).await.unwrap().unwrap();
        let log = String::from_utf8(log.to_vec()).unwrap();
        assert!(log.contains("Node a created (MASTER)"));
        assert!(log.contains("Master changed from <none> to a"));
        assert!(log.contains("Node a now TERMINATED"));
        assert!(log.contains("Node a removed"));
    }

    #[tokio::test]
    async fn test_store_failure_is_surfaced() {
        let (store, publisher) = publisher();
        store.set_available(false);
        assert!(publisher
            .publish_self(NodeRecord::new("a", NodeStatus::Standby, at(0)))
            .await
            .is_err());
        assert!(publisher.read_plane().await.is_err());
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.set_latency(Duration::from_millis(200));
        let publisher = NodeRecordPublisher::new(store, Duration::from_millis(20));
        assert!(matches!(
            publisher.read_plane().await,
            Err(Error::StoreTimeout { .. })
        ));
    }
}
