//! Persistence Module
//!
//! Object mementos, the store that checkpoints and deltas them, and the
//! periodic persister that batches runtime changes.

pub mod listener;
pub mod memento;
pub mod store;
pub mod version;

pub use listener::{MementoSource, PeriodicPersister};
pub use memento::{
    ConfigValue, Manifest, ManifestEntry, MementoHeader, ObjectKind, ObjectMemento, ObjectRef,
};
pub use store::{LoadFailure, LoadedSnapshot, MementoStore};
pub use version::PLATFORM_VERSION;
