//! High Availability Module
//!
//! Shared-store election: nodes publish heartbeats, read each other's
//! records and agree on a single master by a deterministic choice.

pub mod chooser;
pub mod clock;
pub mod coordinator;

pub use chooser::{AlphabeticMasterChooser, MasterChooser};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{
    CoordinatorSettings, HighAvailabilityCoordinator, NoopPromotionListener, PromotionListener,
    StateTransition,
};
