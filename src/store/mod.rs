//! Shared Store Module
//!
//! Key/blob storage shared by every management node. Node heartbeats,
//! the master pointer and object mementos all live here, namespaced by key.

pub mod codec;
mod file;
mod memory;
pub mod queue;
mod sqlite;

pub use file::FileObjectStore;
pub use memory::InMemoryObjectStore;
pub use queue::{KeyedWriteQueue, WriteTicket};
pub use sqlite::SqliteObjectStore;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{PersistenceConfig, StoreBackend};
use crate::error::{Error, Result};

/// A crash-durable key/blob store reachable by all nodes.
///
/// No multi-key transactions are assumed. Implementations must tolerate
/// concurrent writers from other processes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write or overwrite a value
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Read a value, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// List keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete a value; deleting an absent key succeeds
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether a key exists
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Append bytes to a value. Not atomic across writers.
    async fn append(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut combined = self
            .get(key)
            .await?
            .map(|b| b.to_vec())
            .unwrap_or_default();
        combined.extend_from_slice(data);
        self.put(key, Bytes::from(combined)).await
    }

    /// Human readable description for logs
    fn summary_name(&self) -> String;
}

/// Key layout of the shared store
pub mod keys {
    use crate::error::{Error, Result};

    /// Key holding the current master node id (empty when cleared)
    pub const MASTER: &str = "master";

    /// Key holding the human readable plane change log
    pub const CHANGE_LOG: &str = "change.log";

    /// Suffix of in-progress file writes; listings never return it
    pub const TEMP_SUFFIX: &str = ".tmp";

    /// Prefix of per-node heartbeat records
    pub const NODE_PREFIX: &str = "node/";

    /// Key of a node's heartbeat record
    pub fn node(node_id: &str) -> String {
        format!("{}{}", NODE_PREFIX, node_id)
    }

    /// Extract the node id from a heartbeat key
    pub fn node_id_from_key(key: &str) -> Option<&str> {
        key.strip_prefix(NODE_PREFIX).filter(|id| !id.is_empty())
    }

    /// Reject ids that cannot be used as a single key segment
    pub fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Store("empty id".into()));
        }
        if id.contains('/') || id.contains('\\') || id == "." || id == ".." {
            return Err(Error::Store(format!("id {:?} is not a valid key segment", id)));
        }
        if id.ends_with(TEMP_SUFFIX) {
            return Err(Error::Store(format!(
                "id {:?} ends with the reserved suffix {}",
                id, TEMP_SUFFIX
            )));
        }
        Ok(())
    }
}

/// Open the store backend selected by configuration
pub fn open(config: &PersistenceConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryObjectStore::new()),
        StoreBackend::File => Arc::new(FileObjectStore::new(
            config.data_dir.clone(),
            config.compression,
        )?),
        StoreBackend::Sqlite => Arc::new(SqliteObjectStore::open(&config.data_dir)?),
    };
    tracing::debug!("Opened shared store {}", store.summary_name());
    Ok(store)
}

/// Run a store operation with an upper bound on its latency
pub async fn with_timeout<T, F>(key: &str, timeout: std::time::Duration, op: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, op).await {
        Ok(result) => result,
        Err(_) => Err(Error::StoreTimeout {
            key: key.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
