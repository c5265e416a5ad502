//! Where a resident goes next

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::db::schemas::{BuildingDoc, ResidentDoc};
use crate::store::BuildingStore;
use crate::types::Result;

/// What a resident can see from where it stands
#[derive(Debug, Clone, Default)]
pub struct Surroundings {
    pub addresses: Vec<String>,
    pub buildings: Vec<BuildingDoc>,
}

/// Chosen next address; `building` is `None` for an empty lot
#[derive(Debug, Clone)]
pub struct Destination {
    pub address: String,
    pub building: Option<BuildingDoc>,
}

#[async_trait]
pub trait Navigator: Send + Sync {
    async fn look_around(&self, resident: &ResidentDoc) -> Result<Surroundings>;

    fn choose_building(&self, resident: &ResidentDoc, surroundings: Surroundings) -> Option<Destination>;
}

/// Address of lot `i` on `floor`
pub fn lot_address(floor: &str, i: usize) -> String {
    format!("{}-{:04}", floor, i)
}

/// Wanders uniformly among the addresses on the resident's floor.
///
/// A floor has `lots` numbered lots, built on or not, plus the address of
/// every building stored on it.
pub struct FloorNavigator {
    buildings: Arc<dyn BuildingStore>,
    lots: usize,
}

impl FloorNavigator {
    /// Only addresses that have a building
    pub fn new(buildings: Arc<dyn BuildingStore>) -> Self {
        Self::with_lots(buildings, 0)
    }

    pub fn with_lots(buildings: Arc<dyn BuildingStore>, lots: usize) -> Self {
        Self { buildings, lots }
    }
}

#[async_trait]
impl Navigator for FloorNavigator {
    async fn look_around(&self, resident: &ResidentDoc) -> Result<Surroundings> {
        let buildings = self.buildings.list_by_floor(&resident.floor).await?;
        let mut addresses: Vec<String> = (0..self.lots)
            .map(|i| lot_address(&resident.floor, i))
            .collect();
        for building in &buildings {
            if !addresses.contains(&building.address) {
                addresses.push(building.address.clone());
            }
        }
        Ok(Surroundings {
            addresses,
            buildings,
        })
    }

    fn choose_building(&self, resident: &ResidentDoc, surroundings: Surroundings) -> Option<Destination> {
        let Surroundings {
            addresses,
            mut buildings,
        } = surroundings;

        // Moving on beats standing still when there is anywhere else to go
        let candidates: Vec<&String> = match addresses
            .iter()
            .filter(|a| Some(a.as_str()) != resident.address.as_deref())
            .collect::<Vec<_>>()
        {
            others if others.is_empty() => addresses.iter().collect(),
            others => others,
        };

        let address = (*candidates.choose(&mut rand::thread_rng())?).clone();
        let building = buildings
            .iter()
            .position(|b| b.address == address)
            .map(|i| buildings.swap_remove(i));

        Some(Destination { address, building })
    }
}
