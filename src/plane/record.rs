//! Plane Records
//!
//! Per-node heartbeat records, the aggregate plane view and the deltas
//! used to change it.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persistence::version::PLATFORM_VERSION;

/// Status of a management node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Started but not yet joined
    Uninitialised,
    /// Tracking the plane, not accepting mutations
    Standby,
    /// Accepting mutations
    Master,
    /// Unrecoverable local error, or a peer whose heartbeat stopped
    Failed,
    /// Shut down gracefully
    Terminated,
}

impl NodeStatus {
    /// Whether a node in this status takes part in elections
    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Standby | NodeStatus::Master)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Uninitialised => write!(f, "UNINITIALISED"),
            NodeStatus::Standby => write!(f, "STANDBY"),
            NodeStatus::Master => write!(f, "MASTER"),
            NodeStatus::Failed => write!(f, "FAILED"),
            NodeStatus::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Heartbeat record of a single node. Written only by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Stable unique node id
    pub node_id: String,
    /// Platform version of the writing node
    pub platform_version: String,
    /// Status claimed by the node
    pub status: NodeStatus,
    /// Time of the last heartbeat
    pub timestamp_utc: DateTime<Utc>,
    /// Reachable endpoint
    pub uri: Option<String>,
    /// Election priority (higher wins)
    #[serde(default)]
    pub priority: i64,
}

impl NodeRecord {
    /// Create a record stamped with the running platform version
    pub fn new(node_id: impl Into<String>, status: NodeStatus, timestamp_utc: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            platform_version: PLATFORM_VERSION.to_string(),
            status,
            timestamp_utc,
            uri: None,
            priority: 0,
        }
    }

    pub fn with_uri(mut self, uri: Option<String>) -> Self {
        self.uri = uri;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the heartbeat is older than `timeout` as seen from `now`.
    /// Timestamps ahead of `now` (clock skew) count as fresh.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match now.signed_duration_since(self.timestamp_utc).to_std() {
            Ok(age) => age > timeout,
            Err(_) => false,
        }
    }

    /// Fresh heartbeat and an election-eligible status
    pub fn is_live(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.status.is_active() && !self.is_stale(now, timeout)
    }

    /// Encode for the store
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from the store
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Counts of nodes by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneSummary {
    pub total_nodes: usize,
    pub uninitialised_nodes: usize,
    pub standby_nodes: usize,
    pub master_nodes: usize,
    pub failed_nodes: usize,
    pub terminated_nodes: usize,
    pub master_id: Option<String>,
}

/// Logical join of every node record plus the master pointer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneRecord {
    /// Id of the recognised master, if any
    pub master_node_id: Option<String>,
    /// All node records by id
    pub nodes: BTreeMap<String, NodeRecord>,
}

impl PlaneRecord {
    pub fn node(&self, node_id: &str) -> Option<&NodeRecord> {
        self.nodes.get(node_id)
    }

    /// The master record if the pointer names a node that claims MASTER
    /// and whose heartbeat is fresh
    pub fn live_master(&self, now: DateTime<Utc>, timeout: Duration) -> Option<&NodeRecord> {
        let master_id = self.master_node_id.as_deref()?;
        self.nodes.get(master_id).filter(|record| {
            record.status == NodeStatus::Master && !record.is_stale(now, timeout)
        })
    }

    /// Copy of the plane where nodes claiming STANDBY or MASTER with a
    /// stale heartbeat are reported as FAILED
    pub fn with_awol_marked(&self, now: DateTime<Utc>, timeout: Duration) -> PlaneRecord {
        let mut plane = self.clone();
        for record in plane.nodes.values_mut() {
            if record.status.is_active() && record.is_stale(now, timeout) {
                record.status = NodeStatus::Failed;
            }
        }
        plane
    }

    /// Summarize node counts by status
    pub fn summary(&self) -> PlaneSummary {
        let mut summary = PlaneSummary {
            total_nodes: self.nodes.len(),
            master_id: self.master_node_id.clone(),
            ..Default::default()
        };

        for record in self.nodes.values() {
            match record.status {
                NodeStatus::Uninitialised => summary.uninitialised_nodes += 1,
                NodeStatus::Standby => summary.standby_nodes += 1,
                NodeStatus::Master => summary.master_nodes += 1,
                NodeStatus::Failed => summary.failed_nodes += 1,
                NodeStatus::Terminated => summary.terminated_nodes += 1,
            }
        }

        summary
    }

    /// Merge a delta into this view. Node updates follow last-timestamp-wins,
    /// so repeated or reordered deltas converge.
    pub fn apply(&mut self, delta: &PlaneDelta) {
        for record in &delta.updated_nodes {
            match self.nodes.get(&record.node_id) {
                Some(existing) if existing.timestamp_utc > record.timestamp_utc => {}
                _ => {
                    self.nodes.insert(record.node_id.clone(), record.clone());
                }
            }
        }

        for node_id in &delta.removed_node_ids {
            self.nodes.remove(node_id);
        }

        match &delta.master_change {
            MasterChange::NoChange => {}
            MasterChange::SetMaster(node_id) => {
                self.master_node_id = Some(node_id.clone());
            }
            MasterChange::ClearMaster { expected } => {
                if expected.is_none() || *expected == self.master_node_id {
                    self.master_node_id = None;
                }
            }
        }
    }
}

/// Change to the master pointer carried by a delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterChange {
    NoChange,
    /// Point the master at a node
    SetMaster(String),
    /// Clear the pointer. With `expected` set, only if it still names that node.
    ClearMaster { expected: Option<String> },
}

/// Incremental change to the plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneDelta {
    pub updated_nodes: Vec<NodeRecord>,
    pub removed_node_ids: Vec<String>,
    pub master_change: MasterChange,
}

impl Default for PlaneDelta {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaneDelta {
    pub fn new() -> Self {
        Self {
            updated_nodes: Vec::new(),
            removed_node_ids: Vec::new(),
            master_change: MasterChange::NoChange,
        }
    }

    pub fn node(mut self, record: NodeRecord) -> Self {
        self.updated_nodes.push(record);
        self
    }

    pub fn remove(mut self, node_id: impl Into<String>) -> Self {
        self.removed_node_ids.push(node_id.into());
        self
    }

    pub fn set_master(mut self, node_id: impl Into<String>) -> Self {
        self.master_change = MasterChange::SetMaster(node_id.into());
        self
    }

    /// Clear the master pointer only if it still names `node_id`
    pub fn clear_master(mut self, node_id: impl Into<String>) -> Self {
        self.master_change = MasterChange::ClearMaster {
            expected: Some(node_id.into()),
        };
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updated_nodes.is_empty()
            && self.removed_node_ids.is_empty()
            && self.master_change == MasterChange::NoChange
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_staleness() {
        let record = NodeRecord::new("a", NodeStatus::Master, at(0));
        let timeout = Duration::from_secs(30);
        assert!(!record.is_stale(at(30), timeout));
        assert!(record.is_stale(at(31), timeout));
        // Clock skew: heartbeat from the future is fresh
        assert!(!record.is_stale(at(-100), timeout));
    }

    #[test]
    fn test_live_master_requires_master_status() {
        let timeout = Duration::from_secs(30);
        let mut plane = PlaneRecord::default();
        plane.apply(
            &PlaneDelta::new()
                .node(NodeRecord::new("a", NodeStatus::Terminated, at(0)))
                .set_master("a"),
        );
        assert!(plane.live_master(at(1), timeout).is_none());

        plane.apply(&PlaneDelta::new().node(NodeRecord::new("a", NodeStatus::Master, at(1))));
        assert_eq!(plane.live_master(at(2), timeout).unwrap().node_id, "a");
        assert!(plane.live_master(at(40), timeout).is_none());
    }

    #[test]
    fn test_last_timestamp_wins() {
        let newer = PlaneDelta::new().node(NodeRecord::new("a", NodeStatus::Master, at(10)));
        let older = PlaneDelta::new().node(NodeRecord::new("a", NodeStatus::Standby, at(5)));

        let mut forward = PlaneRecord::default();
        forward.apply(&older);
        forward.apply(&newer);

        let mut backward = PlaneRecord::default();
        backward.apply(&newer);
        backward.apply(&older);
        backward.apply(&newer);

        assert_eq!(forward, backward);
        assert_eq!(forward.nodes["a"].status, NodeStatus::Master);
    }

    #[test]
    fn test_conditional_clear() {
        let mut plane = PlaneRecord::default();
        plane.apply(&PlaneDelta::new().set_master("b"));
        plane.apply(&PlaneDelta::new().clear_master("a"));
        assert_eq!(plane.master_node_id.as_deref(), Some("b"));
        plane.apply(&PlaneDelta::new().clear_master("b"));
        assert!(plane.master_node_id.is_none());
    }

    #[test]
    fn test_awol_and_summary() {
        let timeout = Duration::from_secs(30);
        let mut plane = PlaneRecord::default();
        plane.apply(
            &PlaneDelta::new()
                .node(NodeRecord::new("a", NodeStatus::Master, at(0)))
                .node(NodeRecord::new("b", NodeStatus::Standby, at(50)))
                .node(NodeRecord::new("c", NodeStatus::Terminated, at(0)))
                .set_master("a"),
        );

        let marked = plane.with_awol_marked(at(60), timeout);
        assert_eq!(marked.nodes["a"].status, NodeStatus::Failed);
        assert_eq!(marked.nodes["b"].status, NodeStatus::Standby);
        assert_eq!(marked.nodes["c"].status, NodeStatus::Terminated);

        let summary = marked.summary();
        assert_eq!(summary.total_nodes, 3);
        assert_eq!(summary.failed_nodes, 1);
        assert_eq!(summary.standby_nodes, 1);
        assert_eq!(summary.terminated_nodes, 1);
        assert_eq!(summary.master_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_record_encoding() {
        let record = NodeRecord::new("node-1", NodeStatus::Standby, at(3))
            .with_uri(Some("https://node-1:8443".into()))
            .with_priority(7);
        let decoded = NodeRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }
}
