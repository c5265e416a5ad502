//! Starting, tracking and finishing actions on buildings

pub mod chooser;
pub mod coordinator;
pub mod lifecycle;

pub use chooser::{ActionChooser, ActionRegistry, RandomActionChooser};
pub use coordinator::{Coordinator, EnergyConfig, FinishReport, Stores};
pub use lifecycle::{ActionLifecycle, DiscardReason, LifecycleConfig, Reconciliation};
