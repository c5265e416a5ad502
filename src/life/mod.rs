//! Resident life: moving between buildings and driving actions

pub mod event;
pub mod navigator;
pub mod occupancy;
pub mod scheduler;

pub use event::{CycleOutcome, LifeCycle, Settled};
pub use navigator::{lot_address, Destination, FloorNavigator, Navigator, Surroundings};
pub use occupancy::Occupancy;
pub use scheduler::{Scheduler, SchedulerConfig, TickReport};
