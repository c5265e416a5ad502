//! In-memory stores
//!
//! Used in dev mode when MongoDB is not available, and by tests. Each update
//! runs under the map shard lock of its key, which gives the same per-record
//! atomicity a single-document MongoDB update does.

use async_trait::async_trait;
use bson::oid::ObjectId;
use dashmap::DashMap;
use tracing::debug;

use super::{BuildingStore, BuildingUpdate, ResidentStore, ResidentUpdate};
use crate::db::schemas::{ActionStatus, BuildingDoc, ResidentDoc};
use crate::types::{MiesError, Result};

/// Building store backed by a concurrent map
#[derive(Default)]
pub struct MemoryBuildingStore {
    buildings: DashMap<ObjectId, BuildingDoc>,
}

impl MemoryBuildingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }
}

#[async_trait]
impl BuildingStore for MemoryBuildingStore {
    async fn get(&self, id: &ObjectId) -> Result<Option<BuildingDoc>> {
        Ok(self.buildings.get(id).map(|b| b.clone()))
    }

    async fn update(&self, id: &ObjectId, update: BuildingUpdate) -> Result<bool> {
        match self.buildings.get_mut(id) {
            Some(mut building) => {
                update.apply_to(&mut building);
                debug!(address = %building.address, "Building updated");
                Ok(true)
            }
            None => Ok(false),
        }
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
        let Some(mut building) = self.buildings.get_mut(id) else {
            return Ok(false);
        };
        match building.actions.get_mut(index) {
            Some(entry) if entry.is_pending() => {
                *entry = closed;
                update.apply_to(&mut building);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert(&self, building: BuildingDoc) -> Result<ObjectId> {
        building.validate()?;
        let id = building.id;
        if self.buildings.iter().any(|b| b.address == building.address) {
            return Err(MiesError::Database(format!(
                "Duplicate building address {}",
                building.address
            )));
        }
        self.buildings.insert(id, building);
        Ok(id)
    }

    async fn list_by_floor(&self, floor: &str) -> Result<Vec<BuildingDoc>> {
        let mut buildings: Vec<BuildingDoc> = self
            .buildings
            .iter()
            .filter(|b| b.floor == floor)
            .map(|b| b.clone())
            .collect();
        buildings.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(buildings)
    }
}

/// Resident store backed by a concurrent map
#[derive(Default)]
pub struct MemoryResidentStore {
    residents: DashMap<ObjectId, ResidentDoc>,
}

impl MemoryResidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResidentStore for MemoryResidentStore {
    async fn get(&self, id: &ObjectId) -> Result<Option<ResidentDoc>> {
        Ok(self.residents.get(id).map(|r| r.clone()))
    }

    async fn update(&self, id: &ObjectId, update: ResidentUpdate) -> Result<bool> {
        match self.residents.get_mut(id) {
            Some(mut resident) => {
                update.apply_to(&mut resident);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert(&self, resident: ResidentDoc) -> Result<ObjectId> {
        let id = resident.id;
        self.residents.insert(id, resident);
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<ResidentDoc>> {
        Ok(self.residents.iter().map(|r| r.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ActionState;
    use chrono::Utc;

    #[tokio::test]
    async fn test_update_merges_only_listed_fields() {
        let store = MemoryBuildingStore::new();
        let mut building = BuildingDoc::new("a-1", "0").with_energy(40.0);
        building.summary.insert("title".into(), "x".into());
        let id = store.insert(building).await.unwrap();

        let matched = store
            .update(
                &id,
                BuildingUpdate {
                    processed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matched);

        let stored = store.get(&id).await.unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.energy, Some(40.0));
        assert_eq!(stored.summary["title"], "x");
    }

    #[tokio::test]
    async fn test_update_missing_building() {
        let store = MemoryBuildingStore::new();
        let matched = store
            .update(&ObjectId::new(), BuildingUpdate::default())
            .await
            .unwrap();
        assert!(!matched);
    }

    #[tokio::test]
    async fn test_close_action_only_once() {
        let store = MemoryBuildingStore::new();
        let id = store.insert(BuildingDoc::new("a-1", "0")).await.unwrap();
        let entry = ActionStatus::pending("fetch-article", ObjectId::new(), "t-1", Utc::now());
        store
            .update(
                &id,
                BuildingUpdate {
                    push_action: Some(entry.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let closed = entry.closed(ActionState::Completed, None, Utc::now());
        assert!(store
            .close_action(&id, 0, closed.clone(), BuildingUpdate::default())
            .await
            .unwrap());
        assert!(!store
            .close_action(&id, 0, closed, BuildingUpdate::default())
            .await
            .unwrap());

        // Out of range is a refusal, not a panic
        let other = entry.closed(ActionState::Discarded, None, Utc::now());
        assert!(!store
            .close_action(&id, 5, other, BuildingUpdate::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_close_action_applies_update_only_when_open() {
        let store = MemoryBuildingStore::new();
        let id = store
            .insert(BuildingDoc::new("a-1", "0").with_energy(100.0))
            .await
            .unwrap();
        let entry = ActionStatus::pending("fetch-article", ObjectId::new(), "t-1", Utc::now());
        store
            .update(
                &id,
                BuildingUpdate {
                    push_action: Some(entry.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let drain = BuildingUpdate {
            energy: Some(0.0),
            processed: Some(true),
            ..Default::default()
        };
        let closed = entry.closed(ActionState::Completed, None, Utc::now());
        assert!(store
            .close_action(&id, 0, closed.clone(), drain)
            .await
            .unwrap());

        let refill = BuildingUpdate {
            energy: Some(100.0),
            ..Default::default()
        };
        assert!(!store.close_action(&id, 0, closed, refill).await.unwrap());

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.energy, Some(0.0));
        assert!(stored.processed);
        assert_eq!(stored.actions[0].status, ActionState::Completed);
    }

    #[tokio::test]
    async fn test_list_by_floor() {
        let store = MemoryBuildingStore::new();
        store.insert(BuildingDoc::new("b", "1")).await.unwrap();
        store.insert(BuildingDoc::new("a", "1")).await.unwrap();
        store.insert(BuildingDoc::new("c", "2")).await.unwrap();

        let floor: Vec<String> = store
            .list_by_floor("1")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.address)
            .collect();
        assert_eq!(floor, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_address_rejected() {
        let store = MemoryBuildingStore::new();
        store.insert(BuildingDoc::new("a", "1")).await.unwrap();
        assert!(store.insert(BuildingDoc::new("a", "1")).await.is_err());
    }
}
