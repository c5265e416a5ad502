//! MongoDB-backed stores

use async_trait::async_trait;
use bson::{doc, oid::ObjectId};
use tracing::{debug, info};

use super::{BuildingStore, BuildingUpdate, ResidentStore, ResidentUpdate};
use crate::db::schemas::{
    ActionStatus, BuildingDoc, ResidentDoc, BUILDING_COLLECTION, RESIDENT_COLLECTION,
};
use crate::db::{by_id, MongoClient, MongoCollection};
use crate::types::{MiesError, Result};

/// Building store over the `buildings` collection
#[derive(Clone)]
pub struct MongoBuildingStore {
    collection: MongoCollection<BuildingDoc>,
}

impl MongoBuildingStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        let collection = client.collection::<BuildingDoc>(BUILDING_COLLECTION).await?;
        info!("Building store ready ({})", BUILDING_COLLECTION);
        Ok(Self { collection })
    }
}

#[async_trait]
impl BuildingStore for MongoBuildingStore {
    async fn get(&self, id: &ObjectId) -> Result<Option<BuildingDoc>> {
        // Decode by hand so malformed records surface as InvalidRecord
        match self.collection.find_one_raw(by_id(id)).await? {
            Some(doc) => BuildingDoc::from_document(doc).map(Some),
            None => Ok(None),
        }
    }

    async fn update(&self, id: &ObjectId, update: BuildingUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(true);
        }
        let result = self
            .collection
            .update_one(by_id(id), update.to_update_document()?)
            .await?;
        debug!(id = %id, matched = result.matched_count, "Building updated");
        Ok(result.matched_count > 0)
    }

    async fn close_action(
        &self,
        id: &ObjectId,
        index: usize,
        closed: ActionStatus,
        update: BuildingUpdate,
    ) -> Result<bool> {
        if update.push_action.is_some() {
            return Err(MiesError::Internal("cannot append while closing an action".into()));
        }

        let slot = format!("actions.{}", index);
        let mut filter = by_id(id);
        filter.insert(slot.as_str(), doc! { "$exists": true });
        filter.insert(format!("{}.endedAt", slot), doc! { "$exists": false });

        // One document, one write: the entry and the building fields commit together
        let mut set = update
            .to_update_document()?
            .get_document("$set")
            .cloned()
            .unwrap_or_default();
        set.insert(slot, bson::to_bson(&closed)?);
        let update = doc! { "$set": set };

        let result = self.collection.update_one(filter, update).await?;
        Ok(result.matched_count > 0)
    }

    async fn insert(&self, building: BuildingDoc) -> Result<ObjectId> {
        building.validate()?;
        let id = building.id;
        self.collection.insert_one(building).await?;
        Ok(id)
    }

    async fn list_by_floor(&self, floor: &str) -> Result<Vec<BuildingDoc>> {
        self.collection.find_many(doc! { "flr": floor }).await
    }
}

/// Resident store over the `residents` collection
#[derive(Clone)]
pub struct MongoResidentStore {
    collection: MongoCollection<ResidentDoc>,
}

impl MongoResidentStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        let collection = client.collection::<ResidentDoc>(RESIDENT_COLLECTION).await?;
        info!("Resident store ready ({})", RESIDENT_COLLECTION);
        Ok(Self { collection })
    }
}

#[async_trait]
impl ResidentStore for MongoResidentStore {
    async fn get(&self, id: &ObjectId) -> Result<Option<ResidentDoc>> {
        match self.collection.find_one_raw(by_id(id)).await? {
            Some(doc) => bson::from_document(doc)
                .map(Some)
                .map_err(|e| MiesError::InvalidRecord(format!("resident {}: {}", id, e))),
            None => Ok(None),
        }
    }

    async fn update(&self, id: &ObjectId, update: ResidentUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(true);
        }
        let result = self
            .collection
            .update_one(by_id(id), update.to_update_document())
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn insert(&self, resident: ResidentDoc) -> Result<ObjectId> {
        let id = resident.id;
        self.collection.insert_one(resident).await?;
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<ResidentDoc>> {
        self.collection.find_many(doc! {}).await
    }
}
