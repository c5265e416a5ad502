//! Per-floor building counters
//!
//! One document per (floor, state) pair holding the number of buildings on
//! that floor currently in that state.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for floor counters
pub const FLOOR_STAT_COLLECTION: &str = "floor_stats";

/// Processing state a building is counted under
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildingState {
    Unprocessed,
    BeingProcessed,
    Processed,
}

impl BuildingState {
    pub const ALL: [BuildingState; 3] = [
        BuildingState::Unprocessed,
        BuildingState::BeingProcessed,
        BuildingState::Processed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unprocessed => "UNPROCESSED",
            Self::BeingProcessed => "BEING_PROCESSED",
            Self::Processed => "PROCESSED",
        }
    }
}

impl std::fmt::Display for BuildingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FloorStatDoc {
    #[serde(default)]
    pub metadata: Metadata,

    #[serde(rename = "flr")]
    pub floor: String,

    pub state: String,

    #[serde(default)]
    pub count: i64,
}

impl IntoIndexes for FloorStatDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "flr": 1, "state": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("floor_state_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for FloorStatDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
