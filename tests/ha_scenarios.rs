//! Failover scenarios across several coordinators sharing one store.
//!
//! Every coordinator uses the same manual clock and a poll interval long
//! enough that background loops never fire; cycles are driven explicitly
//! with `poll_once`.

use std::sync::Arc;
use std::time::Duration;

use wolfcontrol::config::StartMode;
use wolfcontrol::ha::{Clock, CoordinatorSettings, HighAvailabilityCoordinator, ManualClock};
use wolfcontrol::plane::{NodeRecordPublisher, NodeStatus};
use wolfcontrol::store::InMemoryObjectStore;
use wolfcontrol::Error;

const POLL: Duration = Duration::from_secs(600);
const TIMEOUT: Duration = Duration::from_secs(30);

struct Cluster {
    store: Arc<InMemoryObjectStore>,
    clock: Arc<ManualClock>,
}

impl Cluster {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryObjectStore::new()),
            clock: Arc::new(ManualClock::default()),
        }
    }

    fn node(&self, node_id: &str, priority: i64) -> Arc<HighAvailabilityCoordinator> {
        let settings = CoordinatorSettings {
            node_id: node_id.to_string(),
            uri: Some(format!("http://{}:8081", node_id)),
            poll_interval: POLL,
            failure_timeout: TIMEOUT,
            priority,
        };
        let publisher = Arc::new(NodeRecordPublisher::new(
            self.store.clone(),
            Duration::from_secs(1),
        ));
        Arc::new(HighAvailabilityCoordinator::new(settings, publisher).with_clock(self.clock.clone()))
    }

    fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    async fn master_pointer(&self) -> Option<String> {
        let publisher = NodeRecordPublisher::new(self.store.clone(), Duration::from_secs(1));
        publisher.read_plane().await.unwrap().master_node_id
    }
}

#[tokio::test]
async fn clean_promotion_of_first_node() {
    let cluster = Cluster::new();
    let a = cluster.node("node-a", 0);
    let b = cluster.node("node-b", 0);

    a.start(StartMode::Auto).await.unwrap();
    b.start(StartMode::Auto).await.unwrap();

    assert_eq!(a.status().await, NodeStatus::Master);
    assert_eq!(b.status().await, NodeStatus::Standby);
    assert_eq!(cluster.master_pointer().await.as_deref(), Some("node-a"));

    // Steady state: polling changes nothing
    cluster.clock.advance(Duration::from_secs(5));
    a.poll_once().await.unwrap();
    b.poll_once().await.unwrap();
    assert_eq!(a.status().await, NodeStatus::Master);
    assert_eq!(b.status().await, NodeStatus::Standby);

    let summary = b.last_plane().await.unwrap().summary();
    assert_eq!(summary.total_nodes, 2);
    assert_eq!(summary.master_nodes, 1);
    assert_eq!(summary.standby_nodes, 1);
}

#[tokio::test]
async fn stale_master_is_replaced_and_steps_down_on_return() {
    let cluster = Cluster::new();
    let a = cluster.node("node-a", 0);
    let b = cluster.node("node-b", 0);
    a.start(StartMode::Auto).await.unwrap();
    b.start(StartMode::Auto).await.unwrap();

    // node-a stops heartbeating
    cluster.clock.advance(TIMEOUT + Duration::from_secs(1));
    b.poll_once().await.unwrap();

    assert_eq!(b.status().await, NodeStatus::Master);
    assert_eq!(cluster.master_pointer().await.as_deref(), Some("node-b"));

    // node-a comes back, sees a healthy master that is not itself
    a.poll_once().await.unwrap();
    assert_eq!(a.status().await, NodeStatus::Standby);
    assert_eq!(cluster.master_pointer().await.as_deref(), Some("node-b"));

    let plane = b.last_plane().await.unwrap();
    let awol = plane.with_awol_marked(cluster.clock_now(), TIMEOUT);
    assert_eq!(awol.node("node-a").unwrap().status, NodeStatus::Failed);
}

#[tokio::test]
async fn election_prefers_priority_then_lowest_id() {
    let cluster = Cluster::new();
    let a = cluster.node("node-a", 0);
    let b = cluster.node("node-b", 0);
    let c = cluster.node("node-c", 10);
    let d = cluster.node("node-d", 10);
    for node in [&a, &b, &c, &d] {
        node.start(StartMode::Auto).await.unwrap();
    }
    assert_eq!(a.status().await, NodeStatus::Master);

    // Standbys heartbeat halfway through the timeout; the master does not
    cluster.clock.advance(TIMEOUT / 2);
    for node in [&b, &c, &d] {
        node.poll_once().await.unwrap();
    }
    cluster.clock.advance(TIMEOUT / 2 + Duration::from_secs(1));

    // node-b sees node-c as the rightful choice and waits for it
    b.poll_once().await.unwrap();
    assert_eq!(b.status().await, NodeStatus::Standby);
    d.poll_once().await.unwrap();
    assert_eq!(d.status().await, NodeStatus::Standby);

    c.poll_once().await.unwrap();
    assert_eq!(c.status().await, NodeStatus::Master);

    for node in [&a, &b, &d] {
        node.poll_once().await.unwrap();
    }
    let mut masters = 0;
    for node in [&a, &b, &c, &d] {
        if node.status().await == NodeStatus::Master {
            masters += 1;
        }
    }
    assert_eq!(masters, 1);
    assert_eq!(cluster.master_pointer().await.as_deref(), Some("node-c"));
}

#[tokio::test]
async fn start_modes_are_checked_against_the_plane() {
    let cluster = Cluster::new();

    let lonely = cluster.node("node-s", 0);
    assert!(matches!(
        lonely.start(StartMode::Standby).await,
        Err(Error::Config(_))
    ));
    assert_eq!(lonely.status().await, NodeStatus::Uninitialised);
    assert!(cluster.master_pointer().await.is_none());

    let a = cluster.node("node-a", 0);
    a.start(StartMode::Master).await.unwrap();

    let b = cluster.node("node-b", 0);
    assert!(matches!(
        b.start(StartMode::Master).await,
        Err(Error::Config(_))
    ));

    let c = cluster.node("node-c", 0);
    c.start(StartMode::Standby).await.unwrap();
    assert_eq!(c.status().await, NodeStatus::Standby);
}

#[tokio::test]
async fn stopped_master_hands_over() {
    let cluster = Cluster::new();
    let a = cluster.node("node-a", 0);
    let b = cluster.node("node-b", 0);
    a.start(StartMode::Auto).await.unwrap();
    b.start(StartMode::Auto).await.unwrap();

    a.stop().await.unwrap();
    assert_eq!(a.status().await, NodeStatus::Terminated);
    assert!(cluster.master_pointer().await.is_none());

    b.poll_once().await.unwrap();
    assert_eq!(b.status().await, NodeStatus::Master);

    let history: Vec<NodeStatus> = a.state_history().await.iter().map(|t| t.status).collect();
    assert_eq!(history, vec![NodeStatus::Master, NodeStatus::Terminated]);
}
