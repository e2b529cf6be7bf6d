//! In-memory store, shared by every node in a test process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::ObjectStore;
use crate::error::{Error, Result};

/// Process-local implementation of [`ObjectStore`].
///
/// Supports fault injection so callers can exercise unavailability and
/// latency handling.
#[derive(Default)]
pub struct InMemoryObjectStore {
    values: RwLock<BTreeMap<String, Bytes>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a store error
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every subsequent operation
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }

    async fn check(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Store("in-memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.check().await?;
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check().await?;
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.check().await?;
        let values = self.values.read().await;
        Ok(values
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check().await?;
        self.values.write().await.remove(key);
        Ok(())
    }

    fn summary_name(&self) -> String {
        "memory".to_string()
    }
}
