//! MongoDB-backed counter ledger
//!
//! Each delta is a single `$inc` upsert on one (floor, state) document, so
//! concurrent residents never lose updates and no multi-document
//! transaction is needed.

use async_trait::async_trait;
use bson::doc;
use tracing::info;

use super::{BuildingState, FloorStats};
use crate::db::schemas::{FloorStatDoc, FLOOR_STAT_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::types::Result;

#[derive(Clone)]
pub struct MongoFloorStats {
    collection: MongoCollection<FloorStatDoc>,
}

impl MongoFloorStats {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        let collection = client.collection::<FloorStatDoc>(FLOOR_STAT_COLLECTION).await?;
        info!("Floor counters ready ({})", FLOOR_STAT_COLLECTION);
        Ok(Self { collection })
    }
}

#[async_trait]
impl FloorStats for MongoFloorStats {
    async fn add(&self, floor: &str, state: BuildingState, delta: i64) -> Result<i64> {
        let filter = doc! { "flr": floor, "state": state.as_str() };
        let update = doc! {
            "$inc": { "count": delta },
            "$setOnInsert": { "metadata.is_deleted": false },
        };
        let after = self.collection.upsert_and_fetch(filter, update).await?;
        Ok(after.map(|d| d.count).unwrap_or(delta))
    }

    async fn count(&self, floor: &str, state: BuildingState) -> Result<i64> {
        let found = self
            .collection
            .find_many(doc! { "flr": floor, "state": state.as_str() })
            .await?;
        Ok(found.first().map(|d| d.count).unwrap_or(0))
    }
}
