//! Building document schema
//!
//! A building is a stateful, floor-tagged resource with energy, a payload to
//! process and the history of actions dispatched against it.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::action_status::ActionStatus;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{MiesError, Result};

/// Collection name for buildings
pub const BUILDING_COLLECTION: &str = "buildings";

/// Loosely structured content (payload, summary, raw)
pub type Content = Map<String, Value>;

/// Building document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BuildingDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(default)]
    pub metadata: Metadata,

    /// Stable external key, also the mirror key
    pub address: String,

    #[serde(rename = "flr")]
    pub floor: String,

    /// Remaining energy; `None` means the configured baseline applies
    #[serde(default)]
    pub energy: Option<f64>,

    #[serde(default)]
    pub processed: bool,

    /// Content that actions are applied to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Content>,

    #[serde(default)]
    pub summary: Content,

    /// Raw fetched content, usually only present in the mirror copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Content>,

    #[serde(rename = "contentType", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Append-only action history; required
    pub actions: Vec<ActionStatus>,

    #[serde(default)]
    pub occupant: Option<ObjectId>,

    /// Addresses of buildings produced by processing this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,
}

impl BuildingDoc {
    /// Create a new, unprocessed building with an empty history
    pub fn new(address: impl Into<String>, floor: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            address: address.into(),
            floor: floor.into(),
            energy: None,
            processed: false,
            payload: None,
            summary: Content::new(),
            raw: None,
            content_type: None,
            actions: Vec::new(),
            occupant: None,
            outputs: None,
        }
    }

    pub fn with_payload(mut self, content_type: impl Into<String>, payload: Content) -> Self {
        self.content_type = Some(content_type.into());
        self.payload = Some(payload);
        self
    }

    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy);
        self
    }

    /// Decode a stored document, rejecting records that break the data model
    pub fn from_document(doc: Document) -> Result<Self> {
        let id = doc
            .get_object_id("_id")
            .map(|id| id.to_hex())
            .unwrap_or_else(|_| "<no id>".to_string());

        let building: BuildingDoc = bson::from_document(doc)
            .map_err(|e| MiesError::InvalidRecord(format!("building {}: {}", id, e)))?;
        building.validate()?;
        Ok(building)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(MiesError::InvalidRecord(format!(
                "building {} has an empty address",
                self.id
            )));
        }
        if self.floor.is_empty() {
            return Err(MiesError::InvalidRecord(format!(
                "building {} has an empty floor",
                self.id
            )));
        }
        let open = self.actions.iter().filter(|a| a.is_pending()).count();
        if open > 1 {
            // Two residents raced to append; the older entry is unreachable
            tracing::warn!(
                address = %self.address,
                open,
                "Building has more than one open action entry"
            );
        }
        Ok(())
    }

    /// Energy with the baseline applied when unset
    pub fn energy_or(&self, baseline: f64) -> f64 {
        self.energy.unwrap_or(baseline)
    }

    /// Most recent action entry and its index
    pub fn latest_action(&self) -> Option<(usize, &ActionStatus)> {
        self.actions.iter().enumerate().last()
    }

    /// Whether the latest entry is still open
    pub fn has_pending_action(&self) -> bool {
        self.latest_action().map(|(_, a)| a.is_pending()).unwrap_or(false)
    }

    /// Whether a resident moving in should start an action here
    pub fn needs_processing(&self) -> bool {
        self.payload.is_some() && !self.processed
    }
}

impl IntoIndexes for BuildingDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "address": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("address_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "flr": 1 },
                Some(IndexOptions::builder().name("floor_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for BuildingDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
