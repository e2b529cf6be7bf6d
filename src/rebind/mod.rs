//! Rebind Module
//!
//! Turns persisted mementos back into a live, wired and activated object
//! graph, reporting per-object problems instead of giving up on the first.

pub mod context;
pub mod engine;
pub mod graph;
pub mod registry;
pub mod report;

pub use context::RebindContext;
pub use engine::{RebindEngine, RebindOptions, RebindOutcome};
pub use graph::{ActivationState, Handle, LiveGraph, LiveObject, LiveValue};
pub use registry::{ActivationFn, PassiveStrategy, ReconstructionStrategy, TypeRegistry};
pub use report::{IssueKind, RebindIssue, RebindReport};
