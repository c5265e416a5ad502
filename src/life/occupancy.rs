//! Who stands where
//!
//! Occupancy is two independent partial updates: the building's `occupant`
//! and the resident's `bldg`/`address`. Readers may briefly see one without
//! the other.

use bson::oid::ObjectId;
use std::sync::Arc;
use tracing::debug;

use crate::db::schemas::{BuildingDoc, ResidentDoc};
use crate::store::{BuildingStore, BuildingUpdate, ResidentStore, ResidentUpdate};
use crate::types::{MiesError, Result};

#[derive(Clone)]
pub struct Occupancy {
    buildings: Arc<dyn BuildingStore>,
    residents: Arc<dyn ResidentStore>,
}

impl Occupancy {
    pub fn new(buildings: Arc<dyn BuildingStore>, residents: Arc<dyn ResidentStore>) -> Self {
        Self {
            buildings,
            residents,
        }
    }

    /// Clear a building's occupant. A building that no longer exists is
    /// already empty.
    pub async fn remove_occupant(&self, building_id: &ObjectId) -> Result<()> {
        let update = BuildingUpdate {
            occupant: Some(None),
            ..Default::default()
        };
        if !self.buildings.update(building_id, update).await? {
            debug!(building = %building_id, "Vacated building no longer exists");
        }
        Ok(())
    }

    pub async fn add_occupant(&self, resident_id: &ObjectId, building_id: &ObjectId) -> Result<()> {
        let update = BuildingUpdate {
            occupant: Some(Some(*resident_id)),
            ..Default::default()
        };
        if !self.buildings.update(building_id, update).await? {
            return Err(MiesError::NotFound(format!("building {}", building_id)));
        }
        Ok(())
    }

    /// Move the resident into `building`
    pub async fn occupy_building(&self, resident: &ResidentDoc, building: &BuildingDoc) -> Result<()> {
        self.add_occupant(&resident.id, &building.id).await?;
        self.update_resident(
            resident,
            ResidentUpdate {
                building: Some(Some(building.id)),
                address: Some(Some(building.address.clone())),
                ..Default::default()
            },
        )
        .await
    }

    /// Move the resident onto an address without a building
    pub async fn occupy_empty_address(&self, resident: &ResidentDoc, address: &str) -> Result<()> {
        self.update_resident(
            resident,
            ResidentUpdate {
                building: Some(None),
                address: Some(Some(address.to_string())),
                ..Default::default()
            },
        )
        .await
    }

    /// Take the resident off the map entirely
    pub async fn leave(&self, resident: &ResidentDoc) -> Result<()> {
        self.update_resident(
            resident,
            ResidentUpdate {
                building: Some(None),
                address: Some(None),
                ..Default::default()
            },
        )
        .await
    }

    async fn update_resident(&self, resident: &ResidentDoc, update: ResidentUpdate) -> Result<()> {
        if !self.residents.update(&resident.id, update).await? {
            return Err(MiesError::NotFound(format!("resident {}", resident.id)));
        }
        Ok(())
    }
}
