//! In-memory counter ledger

use async_trait::async_trait;
use dashmap::DashMap;

use super::{BuildingState, FloorStats};
use crate::types::Result;

#[derive(Default)]
pub struct MemoryFloorStats {
    counters: DashMap<(String, BuildingState), i64>,
}

impl MemoryFloorStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FloorStats for MemoryFloorStats {
    async fn add(&self, floor: &str, state: BuildingState, delta: i64) -> Result<i64> {
        let mut counter = self.counters.entry((floor.to_string(), state)).or_insert(0);
        *counter += delta;
        Ok(*counter)
    }

    async fn count(&self, floor: &str, state: BuildingState) -> Result<i64> {
        Ok(self
            .counters
            .get(&(floor.to_string(), state))
            .map(|c| *c)
            .unwrap_or(0))
    }
}
