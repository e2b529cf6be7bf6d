//! Management Plane Module
//!
//! Node heartbeat records, the aggregate plane view and the publisher
//! that moves them in and out of the shared store.

pub mod publisher;
pub mod record;

pub use publisher::NodeRecordPublisher;
pub use record::{MasterChange, NodeRecord, NodeStatus, PlaneDelta, PlaneRecord, PlaneSummary};
