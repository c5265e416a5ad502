//! Resident document schema
//!
//! Residents are the agents that wander between buildings and process them.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for residents
pub const RESIDENT_COLLECTION: &str = "residents";

/// Resident document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResidentDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(default)]
    pub metadata: Metadata,

    /// Floor the resident wanders on
    #[serde(rename = "flr")]
    pub floor: String,

    /// Address the resident currently stands at
    #[serde(default)]
    pub address: Option<String>,

    /// Building the resident currently occupies
    #[serde(default, rename = "bldg")]
    pub building: Option<ObjectId>,

    #[serde(default)]
    pub energy: f64,

    /// True while an action this resident started is unresolved
    #[serde(default)]
    pub processing: bool,
}

impl ResidentDoc {
    pub fn new(floor: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            floor: floor.into(),
            address: None,
            building: None,
            energy: 0.0,
            processing: false,
        }
    }
}

impl IntoIndexes for ResidentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "flr": 1 },
            Some(IndexOptions::builder().name("floor_index".to_string()).build()),
        )]
    }
}

impl MutMetadata for ResidentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
