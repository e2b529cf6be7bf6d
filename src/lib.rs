//! WolfControl - Management Plane High Availability and Persistence
//!
//! A set of management nodes shares one object store. Exactly one node is
//! master at a time: it owns the managed object graph and persists it,
//! while the others stand by ready to take over.
//!
//! # Architecture
//!
//! Nodes publish heartbeat records to the shared store and elect a master
//! by reading each other's records; there is no direct node-to-node
//! traffic. A newly promoted master rebuilds the object graph from the
//! mementos the previous master persisted.
//!
//! # Features
//!
//! - Shared-store master election with priorities and failure detection
//! - Last-timestamp-wins plane deltas, safe to retry and reorder
//! - Checkpoint and delta persistence with per-key ordered writes
//! - Memory, file (LZ4 + CRC32 framed) and SQLite store backends
//! - Partial rebind: unresolvable objects are reported, the rest goes live

pub mod config;
pub mod error;
pub mod ha;
pub mod node;
pub mod persistence;
pub mod plane;
pub mod rebind;
pub mod store;

pub use config::WolfControlConfig;
pub use error::{Error, Result};
pub use node::ManagementNode;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{StartMode, WolfControlConfig};
    pub use crate::error::{Error, Result};
    pub use crate::ha::HighAvailabilityCoordinator;
    pub use crate::node::ManagementNode;
    pub use crate::persistence::{MementoStore, ObjectKind, ObjectMemento, ObjectRef};
    pub use crate::plane::{NodeRecordPublisher, NodeStatus, PlaneRecord};
    pub use crate::rebind::{RebindEngine, RebindReport, TypeRegistry};
    pub use crate::store::ObjectStore;
}
