//! Database schemas for mies
//!
//! Defines MongoDB document structures for buildings, residents and the
//! per-floor counters.

mod action_status;
mod building;
mod floor_stat;
mod metadata;
mod resident;

pub use action_status::{ActionState, ActionStatus, ERROR_RESULT};
pub use building::{BuildingDoc, Content, BUILDING_COLLECTION};
pub use floor_stat::{BuildingState, FloorStatDoc, FLOOR_STAT_COLLECTION};
pub use metadata::Metadata;
pub use resident::{ResidentDoc, RESIDENT_COLLECTION};
