//! Durable record stores
//!
//! Buildings and residents are only ever mutated through partial updates
//! keyed by identity. A write names the fields it changes and nothing else,
//! so concurrent residents touching unrelated fields of the same record do
//! not clobber each other.
//!
//! Two implementations of each store exist:
//! - **Mongo**: the authoritative store in deployments
//! - **Memory**: dev mode and tests

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use serde_json::Value;

use crate::db::schemas::{ActionStatus, BuildingDoc, Content, ResidentDoc};
use crate::types::Result;

pub use memory::{MemoryBuildingStore, MemoryResidentStore};
pub use mongo::{MongoBuildingStore, MongoResidentStore};

/// Fields of a building to change; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildingUpdate {
    pub energy: Option<f64>,
    pub processed: Option<bool>,
    pub outputs: Option<Vec<String>>,
    pub content_type: Option<String>,
    pub summary: Option<Content>,
    pub payload: Option<Content>,
    /// `Some(None)` clears the occupant
    pub occupant: Option<Option<ObjectId>>,
    /// Entry to append to the action history
    pub push_action: Option<ActionStatus>,
}

impl BuildingUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// MongoDB update document (`$set` / `$push`)
    pub fn to_update_document(&self) -> Result<Document> {
        let mut set = Document::new();
        if let Some(energy) = self.energy {
            set.insert("energy", energy);
        }
        if let Some(processed) = self.processed {
            set.insert("processed", processed);
        }
        if let Some(outputs) = &self.outputs {
            set.insert("outputs", bson::to_bson(outputs)?);
        }
        if let Some(content_type) = &self.content_type {
            set.insert("contentType", content_type.as_str());
        }
        if let Some(summary) = &self.summary {
            set.insert("summary", bson::to_bson(summary)?);
        }
        if let Some(payload) = &self.payload {
            set.insert("payload", bson::to_bson(payload)?);
        }
        if let Some(occupant) = &self.occupant {
            set.insert(
                "occupant",
                occupant.map(Bson::ObjectId).unwrap_or(Bson::Null),
            );
        }

        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if let Some(action) = &self.push_action {
            update.insert("$push", doc! { "actions": bson::to_bson(action)? });
        }
        Ok(update)
    }

    /// The same field changes in the shape the mirror stores them
    pub fn mirror_fields(&self) -> Result<Content> {
        let mut fields = Content::new();
        if let Some(energy) = self.energy {
            fields.insert("energy".into(), serde_json::to_value(energy)?);
        }
        if let Some(processed) = self.processed {
            fields.insert("processed".into(), Value::Bool(processed));
        }
        if let Some(outputs) = &self.outputs {
            fields.insert("outputs".into(), serde_json::to_value(outputs)?);
        }
        if let Some(content_type) = &self.content_type {
            fields.insert("contentType".into(), Value::String(content_type.clone()));
        }
        if let Some(summary) = &self.summary {
            fields.insert("summary".into(), Value::Object(summary.clone()));
        }
        if let Some(payload) = &self.payload {
            fields.insert("payload".into(), Value::Object(payload.clone()));
        }
        if let Some(occupant) = &self.occupant {
            fields.insert("occupant".into(), serde_json::to_value(occupant)?);
        }
        Ok(fields)
    }

    /// Apply the changes to an in-memory copy
    pub fn apply_to(&self, building: &mut BuildingDoc) {
        if let Some(energy) = self.energy {
            building.energy = Some(energy);
        }
        if let Some(processed) = self.processed {
            building.processed = processed;
        }
        if let Some(outputs) = &self.outputs {
            building.outputs = Some(outputs.clone());
        }
        if let Some(content_type) = &self.content_type {
            building.content_type = Some(content_type.clone());
        }
        if let Some(summary) = &self.summary {
            building.summary = summary.clone();
        }
        if let Some(payload) = &self.payload {
            building.payload = Some(payload.clone());
        }
        if let Some(occupant) = self.occupant {
            building.occupant = occupant;
        }
        if let Some(action) = &self.push_action {
            building.actions.push(action.clone());
        }
    }
}

/// Fields of a resident to change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidentUpdate {
    /// Added to the stored energy (`$inc`), never overwrites it
    pub energy_delta: Option<f64>,
    pub processing: Option<bool>,
    pub building: Option<Option<ObjectId>>,
    pub address: Option<Option<String>>,
}

impl ResidentUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_update_document(&self) -> Document {
        let mut set = Document::new();
        if let Some(processing) = self.processing {
            set.insert("processing", processing);
        }
        if let Some(building) = &self.building {
            set.insert("bldg", building.map(Bson::ObjectId).unwrap_or(Bson::Null));
        }
        if let Some(address) = &self.address {
            set.insert(
                "address",
                address.clone().map(Bson::String).unwrap_or(Bson::Null),
            );
        }

        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if let Some(delta) = self.energy_delta {
            update.insert("$inc", doc! { "energy": delta });
        }
        update
    }

    pub fn apply_to(&self, resident: &mut ResidentDoc) {
        if let Some(delta) = self.energy_delta {
            resident.energy += delta;
        }
        if let Some(processing) = self.processing {
            resident.processing = processing;
        }
        if let Some(building) = self.building {
            resident.building = building;
        }
        if let Some(address) = &self.address {
            resident.address = address.clone();
        }
    }
}

/// Authoritative building storage
#[async_trait]
pub trait BuildingStore: Send + Sync {
    /// Full current record, `None` when the building does not exist
    async fn get(&self, id: &ObjectId) -> Result<Option<BuildingDoc>>;

    /// Merge-patch the listed fields; `false` when nothing matched
    async fn update(&self, id: &ObjectId, update: BuildingUpdate) -> Result<bool>;

    /// Replace the action entry at `index` with `closed` and apply `update`
    /// in the same single-record write, but only while the stored entry is
    /// still open. `false` means the entry was already terminal (or missing)
    /// and nothing changed. `update` must not append an action.
    async fn close_action(
        &self,
        id: &ObjectId,
        index: usize,
        closed: ActionStatus,
        update: BuildingUpdate,
    ) -> Result<bool>;

    async fn insert(&self, building: BuildingDoc) -> Result<ObjectId>;

    async fn list_by_floor(&self, floor: &str) -> Result<Vec<BuildingDoc>>;
}

/// Authoritative resident storage
#[async_trait]
pub trait ResidentStore: Send + Sync {
    async fn get(&self, id: &ObjectId) -> Result<Option<ResidentDoc>>;

    async fn update(&self, id: &ObjectId, update: ResidentUpdate) -> Result<bool>;

    async fn insert(&self, resident: ResidentDoc) -> Result<ObjectId>;

    async fn list(&self) -> Result<Vec<ResidentDoc>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_empty_update() {
        assert!(BuildingUpdate::default().is_empty());
        assert!(ResidentUpdate::default().is_empty());
        let update = BuildingUpdate {
            processed: Some(true),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_update_document_only_names_changed_fields() {
        let update = BuildingUpdate {
            energy: Some(0.0),
            processed: Some(true),
            ..Default::default()
        };
        let doc = update.to_update_document().unwrap();
        let set = doc.get_document("$set").unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get_f64("energy").unwrap(), 0.0);
        assert!(set.get_bool("processed").unwrap());
        assert!(doc.get("$push").is_none());
    }

    #[test]
    fn test_push_action_uses_push() {
        let entry = ActionStatus::pending("fetch-article", ObjectId::new(), "t-1", Utc::now());
        let update = BuildingUpdate {
            push_action: Some(entry),
            ..Default::default()
        };
        let doc = update.to_update_document().unwrap();
        assert!(doc.get("$set").is_none());
        let push = doc.get_document("$push").unwrap();
        assert!(push.get_document("actions").is_ok());
    }

    #[test]
    fn test_clearing_occupant_sets_null() {
        let update = BuildingUpdate {
            occupant: Some(None),
            ..Default::default()
        };
        let doc = update.to_update_document().unwrap();
        let set = doc.get_document("$set").unwrap();
        assert_eq!(set.get("occupant"), Some(&Bson::Null));

        let fields = update.mirror_fields().unwrap();
        assert_eq!(fields.get("occupant"), Some(&Value::Null));
    }

    #[test]
    fn test_mirror_fields_use_wire_names() {
        let update = BuildingUpdate {
            energy: Some(12.5),
            content_type: Some("article-text".into()),
            outputs: Some(vec!["b-2".into()]),
            ..Default::default()
        };
        let fields = update.mirror_fields().unwrap();
        assert_eq!(fields["energy"], 12.5);
        assert_eq!(fields["contentType"], "article-text");
        assert_eq!(fields["outputs"][0], "b-2");
        assert!(!fields.contains_key("actions"));
    }

    #[test]
    fn test_resident_update_apply() {
        let mut resident = ResidentDoc::new("0");
        let building = ObjectId::new();
        resident.energy = 3.0;
        ResidentUpdate {
            energy_delta: Some(7.0),
            processing: Some(true),
            building: Some(Some(building)),
            address: Some(Some("a-1".into())),
        }
        .apply_to(&mut resident);

        assert_eq!(resident.energy, 10.0);
        assert!(resident.processing);
        assert_eq!(resident.building, Some(building));
        assert_eq!(resident.address.as_deref(), Some("a-1"));
    }

    #[test]
    fn test_energy_delta_increments() {
        let update = ResidentUpdate {
            energy_delta: Some(25.0),
            processing: Some(false),
            ..Default::default()
        };
        let doc = update.to_update_document();
        assert_eq!(doc.get_document("$inc").unwrap().get_f64("energy").unwrap(), 25.0);
        let set = doc.get_document("$set").unwrap();
        assert!(!set.get_bool("processing").unwrap());
        assert!(set.get("energy").is_none());
    }

    #[test]
    fn test_delta_only_update_has_no_empty_set() {
        let update = ResidentUpdate {
            energy_delta: Some(1.0),
            ..Default::default()
        };
        let doc = update.to_update_document();
        assert!(doc.get("$set").is_none());
        assert!(doc.get("$inc").is_some());
    }
}
