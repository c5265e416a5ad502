//! Per-floor building counters
//!
//! Every building with a defined processing state is counted under exactly
//! one of UNPROCESSED, BEING_PROCESSED or PROCESSED for its floor. Each call
//! touches a single counter; callers moving a building between states issue
//! two independent calls and must tolerate brief skew between them.
//!
//! A counter dropping below zero means some transition was applied twice or
//! skipped. That is logged as a data-integrity warning and never aborts the
//! caller.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use tracing::warn;

pub use crate::db::schemas::BuildingState;
use crate::types::Result;

pub use memory::MemoryFloorStats;
pub use mongo::MongoFloorStats;

/// Snapshot of the three counters of one floor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloorSummary {
    pub unprocessed: i64,
    pub being_processed: i64,
    pub processed: i64,
}

impl FloorSummary {
    pub fn total(&self) -> i64 {
        self.unprocessed + self.being_processed + self.processed
    }
}

/// Counter ledger keyed by (floor, state)
#[async_trait]
pub trait FloorStats: Send + Sync {
    /// Apply `delta` to one counter and return its new value
    async fn add(&self, floor: &str, state: BuildingState, delta: i64) -> Result<i64>;

    async fn count(&self, floor: &str, state: BuildingState) -> Result<i64>;

    async fn increment(&self, floor: &str, state: BuildingState) -> Result<i64> {
        let value = self.add(floor, state, 1).await?;
        check_non_negative(floor, state, value);
        Ok(value)
    }

    async fn decrement(&self, floor: &str, state: BuildingState) -> Result<i64> {
        let value = self.add(floor, state, -1).await?;
        check_non_negative(floor, state, value);
        Ok(value)
    }

    async fn summary(&self, floor: &str) -> Result<FloorSummary> {
        Ok(FloorSummary {
            unprocessed: self.count(floor, BuildingState::Unprocessed).await?,
            being_processed: self.count(floor, BuildingState::BeingProcessed).await?,
            processed: self.count(floor, BuildingState::Processed).await?,
        })
    }
}

fn check_non_negative(floor: &str, state: BuildingState, value: i64) {
    if value < 0 {
        warn!(
            floor = %floor,
            state = %state,
            value,
            "Floor counter went negative; a transition was applied out of order"
        );
    }
}
