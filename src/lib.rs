//! mies - residents wandering buildings
//!
//! Residents move between buildings on their floor. When a resident walks
//! into a building with unprocessed content it dispatches an action against
//! it and, on a later cycle, collects the result: energy flows from the
//! building to the resident and the building may become processed.
//!
//! ## Components
//!
//! - **Stats**: per-floor UNPROCESSED / BEING_PROCESSED / PROCESSED counters
//! - **Store**: authoritative building and resident records (MongoDB)
//! - **Cache**: expiring, best-effort mirror of building records
//! - **Dispatch**: action execution (in-process pool or NATS JetStream)
//! - **Acting**: the action lifecycle and the energy coordinator
//! - **Smell**: fire-and-forget energy change notifications
//! - **Life**: the per-resident cycle and the scheduler driving it

pub mod acting;
pub mod cache;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod life;
pub mod nats;
pub mod seed;
pub mod smell;
pub mod stats;
pub mod store;
pub mod types;

pub use config::Args;
pub use types::{MiesError, Result};
