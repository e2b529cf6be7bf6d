//! High Availability Coordinator
//!
//! Drives this node's status through
//! `UNINITIALISED -> {STANDBY | MASTER} -> TERMINATED`, with FAILED
//! reachable from either active state. A background task publishes the
//! node's heartbeat every poll interval, reads the plane and elects a new
//! master when the current one is stale.
//!
//! Claims are confirmed by re-reading rather than locking: two nodes may
//! both believe they are master for up to one poll cycle, after which the
//! one not named by the master pointer steps down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::chooser::{AlphabeticMasterChooser, MasterChooser};
use super::clock::{Clock, SystemClock};
use crate::config::{StartMode, WolfControlConfig};
use crate::error::{Error, Result};
use crate::plane::{NodeRecord, NodeRecordPublisher, NodeStatus, PlaneDelta, PlaneRecord};

/// Number of state transitions kept in the history
const MAX_STATE_HISTORY: usize = 200;

/// Notified when this node gains or loses mastership
#[async_trait]
pub trait PromotionListener: Send + Sync {
    /// Called after the mastership claim is published. An error demotes
    /// the node to FAILED.
    async fn promoting_to_master(&self) -> Result<()>;

    /// Called after a former master publishes its new status
    async fn demoted(&self, to: NodeStatus);
}

/// Listener that does nothing
pub struct NoopPromotionListener;

#[async_trait]
impl PromotionListener for NoopPromotionListener {
    async fn promoting_to_master(&self) -> Result<()> {
        Ok(())
    }

    async fn demoted(&self, _to: NodeStatus) {}
}

/// Timing and identity used by the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub node_id: String,
    pub uri: Option<String>,
    pub poll_interval: Duration,
    pub failure_timeout: Duration,
    pub priority: i64,
}

impl CoordinatorSettings {
    pub fn from_config(config: &WolfControlConfig) -> Self {
        Self {
            node_id: config.node.id.clone(),
            uri: config.node.uri.clone(),
            poll_interval: config.poll_interval(),
            failure_timeout: config.failure_timeout(),
            priority: config.ha.priority,
        }
    }
}

/// One entry of the state history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub status: NodeStatus,
    pub at: DateTime<Utc>,
}

/// Runs the election and failure-detection loop for one node
pub struct HighAvailabilityCoordinator {
    settings: CoordinatorSettings,
    publisher: Arc<NodeRecordPublisher>,
    chooser: Box<dyn MasterChooser>,
    clock: Arc<dyn Clock>,
    listener: Arc<dyn PromotionListener>,
    /// Local status
    status: RwLock<NodeStatus>,
    /// Current election priority
    priority: RwLock<i64>,
    /// Plane as of the last successful read
    last_plane: RwLock<Option<PlaneRecord>>,
    /// Most recent transitions, oldest first
    history: RwLock<VecDeque<StateTransition>>,
    /// When the current run of failed cycles began
    failing_since: RwLock<Option<DateTime<Utc>>>,
    /// Set once started (or disabled) until stopped
    running: AtomicBool,
    /// Single-node mode, no polling
    disabled: AtomicBool,
    /// Serializes poll cycles with explicit operations
    cycle_lock: Mutex<()>,
    /// Cancels the poll loop
    cancel: CancellationToken,
    /// Poll loop task
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl HighAvailabilityCoordinator {
    /// Create a coordinator using the system clock and the default chooser
    pub fn new(settings: CoordinatorSettings, publisher: Arc<NodeRecordPublisher>) -> Self {
        let priority = settings.priority;
        Self {
            settings,
            publisher,
            chooser: Box::new(AlphabeticMasterChooser),
            clock: Arc::new(SystemClock),
            listener: Arc::new(NoopPromotionListener),
            status: RwLock::new(NodeStatus::Uninitialised),
            priority: RwLock::new(priority),
            last_plane: RwLock::new(None),
            history: RwLock::new(VecDeque::new()),
            failing_since: RwLock::new(None),
            running: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            cycle_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            poll_task: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_chooser(mut self, chooser: Box<dyn MasterChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn PromotionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.settings.node_id
    }

    /// Current local status
    pub async fn status(&self) -> NodeStatus {
        *self.status.read().await
    }

    /// Master id according to the last plane read
    pub async fn master_id(&self) -> Option<String> {
        self.last_plane
            .read()
            .await
            .as_ref()
            .and_then(|plane| plane.master_node_id.clone())
    }

    /// Plane as of the last successful read
    pub async fn last_plane(&self) -> Option<PlaneRecord> {
        self.last_plane.read().await.clone()
    }

    pub async fn priority(&self) -> i64 {
        *self.priority.read().await
    }

    /// Change the election priority and republish the heartbeat if running
    pub async fn set_priority(&self, priority: i64) -> Result<()> {
        let previous = std::mem::replace(&mut *self.priority.write().await, priority);
        if previous != priority {
            tracing::info!(
                "Priority of node {} changed from {} to {}",
                self.settings.node_id,
                previous,
                priority
            );
        }
        if self.running.load(Ordering::SeqCst) {
            self.publish_health().await?;
        }
        Ok(())
    }

    /// Recent state transitions, oldest first
    pub async fn state_history(&self) -> Vec<StateTransition> {
        self.history.read().await.iter().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Become MASTER unconditionally and never poll. For single-node
    /// deployments.
    pub async fn disable(&self) -> Result<()> {
        let _cycle = self.cycle_lock.lock().await;
        tracing::info!(
            "HA disabled on node {}; acting as sole master",
            self.settings.node_id
        );

        self.disabled.store(true, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        self.set_status(NodeStatus::Master).await;

        let record = self.own_record(NodeStatus::Master).await;
        self.publisher
            .apply_delta(PlaneDelta::new().node(record).set_master(&self.settings.node_id))
            .await?;
        self.refresh_plane().await?;

        self.listener.promoting_to_master().await
    }

    /// Join the plane in the given mode and start polling.
    ///
    /// Fails with a configuration error, before publishing anything, when
    /// MASTER is requested while another live master exists or STANDBY is
    /// requested while none does. A coordinator that was stopped,
    /// terminated or failed cannot be started again.
    pub async fn start(self: &Arc<Self>, mode: StartMode) -> Result<()> {
        let status = self.status().await;
        if matches!(status, NodeStatus::Terminated | NodeStatus::Failed) {
            return Err(Error::InvalidState(format!(
                "HA coordinator for {} is {} and cannot be restarted",
                self.settings.node_id, status
            )));
        }
        if mode == StartMode::Disabled {
            return self.disable().await;
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::InvalidState(format!(
                "HA coordinator for {} already started",
                self.settings.node_id
            )));
        }

        {
            let _cycle = self.cycle_lock.lock().await;

            let plane = self.publisher.read_plane().await?;
            let now = self.clock.now();
            let other_master = plane
                .live_master(now, self.settings.failure_timeout)
                .filter(|master| master.node_id != self.settings.node_id)
                .map(|master| master.node_id.clone());

            match (mode, &other_master) {
                (StartMode::Master, Some(master)) => {
                    return Err(Error::Config(format!(
                        "start mode MASTER requested for {} but node {} is already a live master",
                        self.settings.node_id, master
                    )));
                }
                (StartMode::Standby, None) => {
                    return Err(Error::Config(format!(
                        "start mode STANDBY requested for {} but there is no live master",
                        self.settings.node_id
                    )));
                }
                _ => {}
            }

            tracing::info!(
                "Starting HA on node {} in {} mode (current master: {})",
                self.settings.node_id,
                mode,
                other_master.as_deref().unwrap_or("<none>")
            );

            *self.last_plane.write().await = Some(plane);
            self.running.store(true, Ordering::SeqCst);

            let joined = match other_master {
                None => self.promote().await,
                Some(_) => {
                    self.set_status(NodeStatus::Standby).await;
                    self.publish_health().await
                }
            };
            if let Err(e) = joined {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        self.spawn_poll_loop().await;
        Ok(())
    }

    async fn spawn_poll_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval = self.settings.poll_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = this.poll_once() => {}
                }
            }
            tracing::debug!("HA poll loop for {} stopped", this.settings.node_id);
        });

        *self.poll_task.lock().await = Some(handle);
    }

    /// Run one publish/read/elect cycle.
    ///
    /// Store failures are retried on later cycles; once they have persisted
    /// for longer than the failure timeout the node demotes itself to FAILED.
    pub async fn poll_once(&self) -> Result<()> {
        let _cycle = self.cycle_lock.lock().await;

        if self.disabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.status().await.is_active() {
            return Ok(());
        }

        match self.run_cycle().await {
            Ok(()) => {
                if let Some(since) = self.failing_since.write().await.take() {
                    tracing::info!(
                        "HA store reachable again from node {} (failing since {})",
                        self.settings.node_id,
                        since
                    );
                }
                Ok(())
            }
            Err(e) => {
                let now = self.clock.now();
                let failing_for = {
                    let mut failing_since = self.failing_since.write().await;
                    match *failing_since {
                        None => {
                            tracing::error!(
                                "HA poll cycle failed on node {}: {}",
                                self.settings.node_id,
                                e
                            );
                            *failing_since = Some(now);
                            Duration::ZERO
                        }
                        Some(since) => {
                            tracing::debug!(
                                "HA poll cycle failed again on node {}: {}",
                                self.settings.node_id,
                                e
                            );
                            now.signed_duration_since(since)
                                .to_std()
                                .unwrap_or(Duration::ZERO)
                        }
                    }
                };

                if failing_for > self.settings.failure_timeout {
                    tracing::error!(
                        "HA store unreachable from node {} for {:?}; demoting to FAILED",
                        self.settings.node_id,
                        failing_for
                    );
                    if let Err(publish_err) = self.demote_to(NodeStatus::Failed).await {
                        tracing::debug!("Could not publish FAILED status: {}", publish_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_cycle(&self) -> Result<()> {
        self.publish_health().await?;
        let plane = self.refresh_plane().await?;
        self.check_master(&plane).await
    }

    async fn refresh_plane(&self) -> Result<PlaneRecord> {
        let plane = self.publisher.read_plane().await?;
        *self.last_plane.write().await = Some(plane.clone());
        Ok(plane)
    }

    async fn check_master(&self, plane: &PlaneRecord) -> Result<()> {
        let now = self.clock.now();
        let timeout = self.settings.failure_timeout;
        let me = self.settings.node_id.as_str();
        let status = self.status().await;

        if let Some(master) = plane.live_master(now, timeout) {
            if master.node_id != me {
                if status == NodeStatus::Master {
                    tracing::warn!(
                        "Node {} believed it was master but {} holds mastership; demoting",
                        me,
                        master.node_id
                    );
                    self.demote_to(NodeStatus::Standby).await?;
                }
                return Ok(());
            }
            if status == NodeStatus::Master {
                return Ok(());
            }
            // Pointer names us but we are not master: elect below
        }

        match plane.node(me) {
            None => {
                tracing::error!(
                    "Own record missing for node {}; not electing this cycle",
                    me
                );
                return Ok(());
            }
            Some(record) if record.is_stale(now, timeout) => {
                tracing::error!(
                    "Own record for node {} is stale ({}); not electing this cycle",
                    me,
                    record.timestamp_utc
                );
                return Ok(());
            }
            Some(_) => {}
        }

        let Some(chosen) = self.chooser.choose(plane, now, timeout) else {
            tracing::debug!("No node eligible for mastership");
            return Ok(());
        };

        if chosen.node_id != me {
            tracing::debug!(
                "Master {} unhealthy; waiting for {} to claim",
                plane.master_node_id.as_deref().unwrap_or("<none>"),
                chosen.node_id
            );
            if status == NodeStatus::Master {
                self.demote_to(NodeStatus::Standby).await?;
            }
            return Ok(());
        }

        if status == NodeStatus::Master {
            tracing::info!("Reasserting mastership of node {}", me);
            let record = self.own_record(NodeStatus::Master).await;
            return self
                .publisher
                .apply_delta(PlaneDelta::new().node(record).set_master(me))
                .await;
        }

        tracing::info!(
            "Master {} unhealthy; node {} claiming mastership",
            plane.master_node_id.as_deref().unwrap_or("<none>"),
            me
        );
        self.promote().await
    }

    async fn promote(&self) -> Result<()> {
        let me = self.settings.node_id.as_str();
        let previous = self.status().await;
        self.set_status(NodeStatus::Master).await;

        let record = self.own_record(NodeStatus::Master).await;
        if let Err(e) = self
            .publisher
            .apply_delta(PlaneDelta::new().node(record).set_master(me))
            .await
        {
            tracing::warn!("Node {} failed to publish mastership claim: {}", me, e);
            let fallback = if previous.is_active() {
                previous
            } else {
                NodeStatus::Standby
            };
            self.set_status(fallback).await;
            return Err(e);
        }

        tracing::info!("Node {} promoted to MASTER", me);

        if let Err(e) = self.listener.promoting_to_master().await {
            tracing::error!("Promotion of node {} failed: {}", me, e);
            if let Err(publish_err) = self.demote_to(NodeStatus::Failed).await {
                tracing::debug!("Could not publish FAILED status: {}", publish_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn demote_to(&self, to: NodeStatus) -> Result<()> {
        let me = self.settings.node_id.as_str();
        let previous = self.status().await;
        self.set_status(to).await;

        let mut delta = PlaneDelta::new().node(self.own_record(to).await);
        if previous == NodeStatus::Master {
            delta = delta.clear_master(me);
        }
        let published = self.publisher.apply_delta(delta).await;

        if previous == NodeStatus::Master {
            tracing::info!("Node {} demoted from MASTER to {}", me, to);
            self.listener.demoted(to).await;
        }
        published
    }

    /// Publish TERMINATED and stop polling
    pub async fn stop(&self) -> Result<()> {
        self.halt_poll_loop(false).await;

        let _cycle = self.cycle_lock.lock().await;
        if self.status().await == NodeStatus::Uninitialised {
            self.set_status(NodeStatus::Terminated).await;
            return Ok(());
        }

        tracing::info!("Stopping HA on node {}", self.settings.node_id);
        if let Err(e) = self.demote_to(NodeStatus::Terminated).await {
            tracing::warn!(
                "Failed to publish TERMINATED for node {}: {}",
                self.settings.node_id,
                e
            );
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stop polling without touching the store
    pub async fn terminate(&self) {
        self.halt_poll_loop(true).await;

        let was_master = self.status().await == NodeStatus::Master;
        self.set_status(NodeStatus::Terminated).await;
        self.running.store(false, Ordering::SeqCst);
        if was_master {
            self.listener.demoted(NodeStatus::Terminated).await;
        }
        tracing::info!("HA terminated on node {}", self.settings.node_id);
    }

    async fn halt_poll_loop(&self, abort: bool) {
        self.cancel.cancel();
        if let Some(handle) = self.poll_task.lock().await.take() {
            if abort {
                handle.abort();
            }
            let _ = handle.await;
        }
    }

    /// Remove every node record except the recognised master's
    pub async fn publish_clear_non_master(&self) -> Result<()> {
        let Some(plane) = self.last_plane().await else {
            tracing::warn!("Cannot clear HA node records; HA not active");
            return Ok(());
        };

        let mut delta = PlaneDelta::new();
        for (node_id, record) in &plane.nodes {
            let recognised = record.status == NodeStatus::Master
                && plane.master_node_id.as_deref() == Some(node_id.as_str());
            if !recognised {
                delta = delta.remove(node_id.clone());
            }
        }

        self.publisher.apply_delta(delta).await?;
        self.refresh_plane().await?;
        Ok(())
    }

    async fn publish_health(&self) -> Result<()> {
        let record = self.own_record(self.status().await).await;
        self.publisher.publish_self(record).await
    }

    async fn own_record(&self, status: NodeStatus) -> NodeRecord {
        NodeRecord::new(self.settings.node_id.clone(), status, self.clock.now())
            .with_uri(self.settings.uri.clone())
            .with_priority(*self.priority.read().await)
    }

    async fn set_status(&self, status: NodeStatus) {
        let previous = std::mem::replace(&mut *self.status.write().await, status);
        if previous == status {
            return;
        }

        tracing::debug!(
            "Node {} status {} -> {}",
            self.settings.node_id,
            previous,
            status
        );

        let mut history = self.history.write().await;
        history.push_back(StateTransition {
            status,
            at: self.clock.now(),
        });
        while history.len() > MAX_STATE_HISTORY {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ha::clock::ManualClock;
    use crate::store::InMemoryObjectStore;
    use std::sync::atomic::AtomicUsize;

    // Long enough that the background loop never fires during a test
    const POLL: Duration = Duration::from_secs(600);
    const TIMEOUT: Duration = Duration::from_secs(30);

    fn settings(node_id: &str) -> CoordinatorSettings {
        CoordinatorSettings {
            node_id: node_id.to_string(),
            uri: None,
            poll_interval: POLL,
            failure_timeout: TIMEOUT,
            priority: 0,
        }
    }

    fn coordinator(
        store: &Arc<InMemoryObjectStore>,
        clock: &Arc<ManualClock>,
        node_id: &str,
    ) -> Arc<HighAvailabilityCoordinator> {
        let publisher = Arc::new(NodeRecordPublisher::new(store.clone(), Duration::from_secs(1)));
        Arc::new(
            HighAvailabilityCoordinator::new(settings(node_id), publisher)
                .with_clock(clock.clone()),
        )
    }

    struct CountingListener {
        promotions: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PromotionListener for CountingListener {
        async fn promoting_to_master(&self) -> Result<()> {
            self.promotions.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Activation {
                    object_id: "e1".into(),
                    reason: "boom".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn demoted(&self, _to: NodeStatus) {}
    }

    #[tokio::test]
    async fn test_auto_start_without_master_promotes() {
        let store = Arc::new(InMemoryObjectStore::new());
        let clock = Arc::new(ManualClock::default());
        let a = coordinator(&store, &clock, "node-a");

        a.start(StartMode::Auto).await.unwrap();
        assert_eq!(a.status().await, NodeStatus::Master);
        a.poll_once().await.unwrap();
        assert_eq!(a.master_id().await.as_deref(), Some("node-a"));
        a.terminate().await;
    }

    #[tokio::test]
    async fn test_start_mode_conflicts_fail_fast() {
        let store = Arc::new(InMemoryObjectStore::new());
        let clock = Arc::new(ManualClock::default());

        let b = coordinator(&store, &clock, "node-b");
        assert!(matches!(
            b.start(StartMode::Standby).await,
            Err(Error::Config(_))
        ));
        assert_eq!(b.status().await, NodeStatus::Uninitialised);
        assert!(store.is_empty().await);

        let a = coordinator(&store, &clock, "node-a");
        a.start(StartMode::Master).await.unwrap();

        let c = coordinator(&store, &clock, "node-c");
        assert!(matches!(c.start(StartMode::Master).await, Err(Error::Config(_))));

        b.start(StartMode::Standby).await.unwrap();
        assert_eq!(b.status().await, NodeStatus::Standby);

        a.terminate().await;
        b.terminate().await;
    }

    #[tokio::test]
    async fn test_stolen_mastership_demotes() {
        let store = Arc::new(InMemoryObjectStore::new());
        let clock = Arc::new(ManualClock::default());
        let a = coordinator(&store, &clock, "node-a");
        let b = coordinator(&store, &clock, "node-b");

        a.start(StartMode::Auto).await.unwrap();
        // Force a second master claim, as after a partition heals
        b.disable().await.unwrap();

        a.poll_once().await.unwrap();
        assert_eq!(a.status().await, NodeStatus::Standby);
        assert_eq!(a.master_id().await.as_deref(), Some("node-b"));
        a.terminate().await;
    }

    #[tokio::test]
    async fn test_listener_failure_marks_failed() {
        let store = Arc::new(InMemoryObjectStore::new());
        let clock = Arc::new(ManualClock::default());
        let listener = Arc::new(CountingListener {
            promotions: AtomicUsize::new(0),
            fail: true,
        });
        let publisher = Arc::new(NodeRecordPublisher::new(store.clone(), Duration::from_secs(1)));
        let a = Arc::new(
            HighAvailabilityCoordinator::new(settings("node-a"), publisher)
                .with_clock(clock.clone())
                .with_listener(listener.clone()),
        );

        assert!(a.start(StartMode::Auto).await.is_err());
        assert_eq!(a.status().await, NodeStatus::Failed);
        assert_eq!(listener.promotions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_outage_demotes_after_timeout() {
        let store = Arc::new(InMemoryObjectStore::new());
        let clock = Arc::new(ManualClock::default());
        let a = coordinator(&store, &clock, "node-a");
        a.start(StartMode::Auto).await.unwrap();

        store.set_available(false);
        assert!(a.poll_once().await.is_err());
        assert_eq!(a.status().await, NodeStatus::Master);

        clock.advance(TIMEOUT + Duration::from_secs(1));
        assert!(a.poll_once().await.is_err());
        assert_eq!(a.status().await, NodeStatus::Failed);
        a.terminate().await;
    }

    #[tokio::test]
    async fn test_history_and_priority() {
        let store = Arc::new(InMemoryObjectStore::new());
        let clock = Arc::new(ManualClock::default());
        let a = coordinator(&store, &clock, "node-a");
        a.start(StartMode::Auto).await.unwrap();

        a.set_priority(9).await.unwrap();
        assert_eq!(a.priority().await, 9);
        a.poll_once().await.unwrap();
        assert_eq!(a.last_plane().await.unwrap().nodes["node-a"].priority, 9);

        a.stop().await.unwrap();
        let statuses: Vec<_> = a.state_history().await.into_iter().map(|t| t.status).collect();
        assert_eq!(statuses, vec![NodeStatus::Master, NodeStatus::Terminated]);
    }

    #[tokio::test]
    async fn test_clear_non_master() {
        let store = Arc::new(InMemoryObjectStore::new());
        let clock = Arc::new(ManualClock::default());
        let a = coordinator(&store, &clock, "node-a");
        let b = coordinator(&store, &clock, "node-b");
        a.start(StartMode::Auto).await.unwrap();
        b.start(StartMode::Standby).await.unwrap();
        b.stop().await.unwrap();

        a.poll_once().await.unwrap();
        a.publish_clear_non_master().await.unwrap();

        let plane = a.last_plane().await.unwrap();
        assert_eq!(plane.nodes.keys().collect::<Vec<_>>(), vec!["node-a"]);
        a.terminate().await;
    }

    #[tokio::test]
    async fn test_stopped_or_terminated_coordinator_cannot_restart() {
        let store = Arc::new(InMemoryObjectStore::new());
        let clock = Arc::new(ManualClock::default());

        let a = coordinator(&store, &clock, "node-a");
        a.start(StartMode::Auto).await.unwrap();
        a.stop().await.unwrap();
        assert!(matches!(
            a.start(StartMode::Auto).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            a.start(StartMode::Disabled).await,
            Err(Error::InvalidState(_))
        ));
        assert_eq!(a.status().await, NodeStatus::Terminated);

        let b = coordinator(&store, &clock, "node-b");
        b.start(StartMode::Auto).await.unwrap();
        b.terminate().await;
        assert!(matches!(
            b.start(StartMode::Auto).await,
            Err(Error::InvalidState(_))
        ));
        assert_eq!(b.status().await, NodeStatus::Terminated);
    }
}
