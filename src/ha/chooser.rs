//! Master Chooser
//!
//! Deterministic choice of the next master from a plane view. Every node
//! runs the same chooser over (nearly) the same view, so they agree on the
//! winner without talking to each other.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::plane::{NodeRecord, NodeStatus, PlaneRecord};

/// Picks the node that should be master
pub trait MasterChooser: Send + Sync {
    /// Choose among the nodes of `plane`, or `None` if nobody is eligible
    fn choose<'a>(
        &self,
        plane: &'a PlaneRecord,
        now: DateTime<Utc>,
        failure_timeout: Duration,
    ) -> Option<&'a NodeRecord>;
}

/// Highest priority wins, ties go to the lowest node id.
///
/// Only nodes with a fresh heartbeat that claim STANDBY or MASTER are
/// eligible.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlphabeticMasterChooser;

impl MasterChooser for AlphabeticMasterChooser {
    fn choose<'a>(
        &self,
        plane: &'a PlaneRecord,
        now: DateTime<Utc>,
        failure_timeout: Duration,
    ) -> Option<&'a NodeRecord> {
        plane
            .nodes
            .values()
            .filter(|record| {
                matches!(record.status, NodeStatus::Standby | NodeStatus::Master)
                    && !record.is_stale(now, failure_timeout)
            })
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.node_id.cmp(&b.node_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::PlaneDelta;

    fn plane(now: DateTime<Utc>, records: &[(&str, NodeStatus, i64, i64)]) -> PlaneRecord {
        let mut plane = PlaneRecord::default();
        for (id, status, age_secs, priority) in records {
            let ts = now - chrono::Duration::seconds(*age_secs);
            plane.apply(
                &PlaneDelta::new().node(NodeRecord::new(*id, *status, ts).with_priority(*priority)),
            );
        }
        plane
    }

    #[test]
    fn test_lowest_id_wins() {
        let now = Utc::now();
        let plane = plane(
            now,
            &[
                ("node-c", NodeStatus::Standby, 0, 0),
                ("node-a", NodeStatus::Standby, 0, 0),
                ("node-b", NodeStatus::Standby, 0, 0),
            ],
        );
        let chosen = AlphabeticMasterChooser.choose(&plane, now, Duration::from_secs(30));
        assert_eq!(chosen.unwrap().node_id, "node-a");
    }

    #[test]
    fn test_priority_beats_id() {
        let now = Utc::now();
        let plane = plane(
            now,
            &[
                ("node-a", NodeStatus::Standby, 0, 0),
                ("node-z", NodeStatus::Standby, 0, 5),
            ],
        );
        let chosen = AlphabeticMasterChooser.choose(&plane, now, Duration::from_secs(30));
        assert_eq!(chosen.unwrap().node_id, "node-z");
    }

    #[test]
    fn test_skips_stale_and_inactive() {
        let now = Utc::now();
        let plane = plane(
            now,
            &[
                ("node-a", NodeStatus::Standby, 60, 0),
                ("node-b", NodeStatus::Terminated, 0, 0),
                ("node-c", NodeStatus::Failed, 0, 0),
                ("node-d", NodeStatus::Uninitialised, 0, 0),
            ],
        );
        assert!(AlphabeticMasterChooser
            .choose(&plane, now, Duration::from_secs(30))
            .is_none());
    }
}
