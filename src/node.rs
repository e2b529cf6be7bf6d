//! Management Node
//!
//! Wires one node together: the shared store, the plane publisher and HA
//! coordinator, the memento store and the rebind engine. Memento writes are
//! only allowed while this node is master; on promotion the node rebinds
//! the persisted graph before taking writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::{StartMode, WolfControlConfig};
use crate::error::{Error, Result};
use crate::ha::{CoordinatorSettings, HighAvailabilityCoordinator, PromotionListener};
use crate::persistence::{
    LoadFailure, LoadedSnapshot, MementoSource, MementoStore, ObjectMemento, PeriodicPersister,
};
use crate::plane::{NodeRecordPublisher, NodeStatus};
use crate::rebind::{LiveGraph, RebindEngine, RebindOptions, RebindReport, TypeRegistry};
use crate::store::{self, ObjectStore};

/// Latest memento of every persisted object, kept current by the persister
#[derive(Default)]
struct TrackedObjects {
    objects: BTreeMap<String, ObjectMemento>,
    /// Records that could not be decoded; left untouched by checkpoints
    unreadable: Vec<LoadFailure>,
}

impl TrackedObjects {
    fn from_snapshot(snapshot: &LoadedSnapshot) -> Self {
        Self {
            objects: snapshot
                .mementos
                .iter()
                .map(|m| (m.id.clone(), m.clone()))
                .collect(),
            unreadable: snapshot.failures.clone(),
        }
    }

    fn forget_unreadable(&mut self, id: &str) {
        self.unreadable.retain(|f| f.id.as_deref() != Some(id));
    }
}

/// State bound on the last promotion
#[derive(Default)]
struct BoundState {
    graph: RwLock<Option<LiveGraph>>,
    report: RwLock<Option<RebindReport>>,
    tracked: RwLock<Option<TrackedObjects>>,
}

#[async_trait]
impl MementoSource for BoundState {
    async fn snapshot(&self) -> Result<Vec<ObjectMemento>> {
        match self.tracked.read().await.as_ref() {
            Some(tracked) => Ok(tracked.objects.values().cloned().collect()),
            None => Err(Error::InvalidState(
                "no rebound state to checkpoint".into(),
            )),
        }
    }

    async fn retained_keys(&self) -> Vec<String> {
        match self.tracked.read().await.as_ref() {
            Some(tracked) => tracked.unreadable.iter().map(|f| f.key.clone()).collect(),
            None => Vec::new(),
        }
    }

    async fn record_changed(&self, memento: &ObjectMemento) {
        if let Some(tracked) = self.tracked.write().await.as_mut() {
            tracked.forget_unreadable(&memento.id);
            tracked.objects.insert(memento.id.clone(), memento.clone());
        }
    }

    async fn record_removed(&self, id: &str) {
        if let Some(tracked) = self.tracked.write().await.as_mut() {
            tracked.forget_unreadable(id);
            tracked.objects.remove(id);
        }
    }
}

/// Rebinds and opens memento writes when this node becomes master
struct RebindOnPromotion {
    node_id: String,
    mementos: Arc<MementoStore>,
    engine: Arc<RebindEngine>,
    state: Arc<BoundState>,
    write_timeout: std::time::Duration,
}

#[async_trait]
impl PromotionListener for RebindOnPromotion {
    async fn promoting_to_master(&self) -> Result<()> {
        let snapshot = self.mementos.load_snapshot().await?;

        if snapshot.manifest.is_empty() && snapshot.failures.is_empty() {
            tracing::info!("No persisted state found; node {} starts empty", self.node_id);
            *self.state.graph.write().await = Some(LiveGraph::new());
            *self.state.report.write().await = None;
        } else {
            tracing::info!(
                "Node {} rebinding {} objects from {}",
                self.node_id,
                snapshot.manifest.len(),
                self.mementos.store().summary_name()
            );
            let outcome = self.engine.rebind_snapshot(&snapshot)?;
            let mut report = outcome.report;
            if self.engine.options().strict {
                report.escalate()?;
            }
            report.acknowledge();
            *self.state.graph.write().await = Some(outcome.graph);
            *self.state.report.write().await = Some(report);
        }

        *self.state.tracked.write().await = Some(TrackedObjects::from_snapshot(&snapshot));
        self.mementos.enable_write_access();
        Ok(())
    }

    async fn demoted(&self, to: NodeStatus) {
        tracing::info!("Node {} no longer master ({}); closing memento writes", self.node_id, to);
        if let Err(e) = self.mementos.disable_write_access(self.write_timeout).await {
            tracing::warn!("Pending memento writes did not drain: {}", e);
        }
        *self.state.tracked.write().await = None;
    }
}

/// One management node
pub struct ManagementNode {
    config: WolfControlConfig,
    publisher: Arc<NodeRecordPublisher>,
    mementos: Arc<MementoStore>,
    engine: Arc<RebindEngine>,
    coordinator: Arc<HighAvailabilityCoordinator>,
    persister: Arc<PeriodicPersister>,
    state: Arc<BoundState>,
}

impl ManagementNode {
    /// Open the configured store and rebuild any type passively
    pub fn open(config: WolfControlConfig) -> Result<Self> {
        let store = store::open(&config.persistence)?;
        Ok(Self::with_store(config, store, TypeRegistry::permissive()))
    }

    /// Build a node over an existing store with the given type registry
    pub fn with_store(
        config: WolfControlConfig,
        store: Arc<dyn ObjectStore>,
        registry: TypeRegistry,
    ) -> Self {
        let write_timeout = config.write_timeout();
        let publisher = Arc::new(NodeRecordPublisher::new(store.clone(), write_timeout));
        let mementos = Arc::new(MementoStore::new(store, &config.persistence, write_timeout));
        let engine = Arc::new(RebindEngine::new(
            Arc::new(registry),
            RebindOptions::from(&config.rebind),
        ));
        let state = Arc::new(BoundState::default());

        let listener = Arc::new(RebindOnPromotion {
            node_id: config.node.id.clone(),
            mementos: mementos.clone(),
            engine: engine.clone(),
            state: state.clone(),
            write_timeout,
        });
        let coordinator = Arc::new(
            HighAvailabilityCoordinator::new(CoordinatorSettings::from_config(&config), publisher.clone())
                .with_listener(listener),
        );
        let persister = Arc::new(PeriodicPersister::new(
            mementos.clone(),
            state.clone(),
            config.persist_period(),
            config.checkpoint_interval(),
        ));

        Self {
            config,
            publisher,
            mementos,
            engine,
            coordinator,
            persister,
            state,
        }
    }

    pub fn config(&self) -> &WolfControlConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node.id
    }

    pub fn coordinator(&self) -> &Arc<HighAvailabilityCoordinator> {
        &self.coordinator
    }

    pub fn publisher(&self) -> &Arc<NodeRecordPublisher> {
        &self.publisher
    }

    pub fn mementos(&self) -> &Arc<MementoStore> {
        &self.mementos
    }

    pub fn engine(&self) -> &Arc<RebindEngine> {
        &self.engine
    }

    /// Batches runtime changes into deltas while this node is master
    pub fn persister(&self) -> &Arc<PeriodicPersister> {
        &self.persister
    }

    /// Join the plane in `mode`. Memento writes stay closed unless this
    /// node is promoted.
    pub async fn start(&self, mode: StartMode) -> Result<()> {
        tracing::info!("Starting management node {} ({})", self.node_id(), mode);

        self.mementos
            .disable_write_access(self.config.write_timeout())
            .await?;
        self.coordinator.start(mode).await?;
        self.persister.start().await;

        tracing::info!(
            "Management node {} is {}",
            self.node_id(),
            self.coordinator.status().await
        );
        Ok(())
    }

    /// Flush pending changes, leave the plane and wait for queued writes
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down management node {}", self.node_id());

        if let Err(e) = self.persister.stop().await {
            tracing::warn!("Final persist on shutdown failed: {}", e);
        }
        self.coordinator.stop().await?;

        let timeout = self.config.write_timeout();
        self.mementos.wait_for_writes_completed(timeout).await?;
        self.publisher.wait_for_writes_completed(timeout).await?;
        Ok(())
    }

    pub async fn is_master(&self) -> bool {
        self.coordinator.status().await == NodeStatus::Master
    }

    /// Read access to the graph rebound on the last promotion
    pub async fn graph(&self) -> tokio::sync::RwLockReadGuard<'_, Option<LiveGraph>> {
        self.state.graph.read().await
    }

    /// Report from the last rebind, if one ran
    pub async fn last_report(&self) -> Option<RebindReport> {
        self.state.report.read().await.clone()
    }
}
