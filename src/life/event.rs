//! One resident's life event
//!
//! Strictly sequential per resident:
//!
//! 1. settle the action the resident started last time, if any
//! 2. vacate the current building
//! 3. look around and pick the next address
//! 4. occupy it
//! 5. start an action there when the building has unprocessed content
//!
//! A still-pending action stops the cycle after step 1.

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::navigator::Navigator;
use super::occupancy::Occupancy;
use crate::acting::{ActionChooser, Coordinator, Reconciliation};
use crate::db::schemas::{ActionState, ResidentDoc};
use crate::store::{BuildingStore, ResidentStore};
use crate::types::{MiesError, Result};

/// How the last action was settled this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    /// The resident was not processing anything
    Nothing,
    /// Processing flag cleared without an open action to settle
    Released,
    Completed { energy_gained: f64, processed: bool },
    Discarded,
    Errored,
    Orphaned,
}

/// Result of one life event
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The resident's action is still running; nothing else happened
    Waiting,
    /// Nowhere to go on the floor
    Stranded { settled: Settled },
    Moved {
        settled: Settled,
        address: String,
        started: Option<String>,
    },
}

pub struct LifeCycle {
    coordinator: Arc<Coordinator>,
    occupancy: Occupancy,
    navigator: Arc<dyn Navigator>,
    chooser: Arc<dyn ActionChooser>,
}

impl LifeCycle {
    pub fn new(
        coordinator: Arc<Coordinator>,
        navigator: Arc<dyn Navigator>,
        chooser: Arc<dyn ActionChooser>,
    ) -> Self {
        let stores = coordinator.stores();
        let occupancy = Occupancy::new(Arc::clone(&stores.buildings), Arc::clone(&stores.residents));
        Self {
            coordinator,
            occupancy,
            navigator,
            chooser,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub async fn handle_life_event(&self, resident_id: &ObjectId, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let resident = self.load_resident(resident_id).await?;

        let settled = if resident.processing {
            match self.settle(&resident, now).await? {
                Some(settled) => settled,
                None => return Ok(CycleOutcome::Waiting),
            }
        } else {
            Settled::Nothing
        };

        // Settling may have changed energy and the processing flag
        let resident = match settled {
            Settled::Nothing => resident,
            _ => self.load_resident(resident_id).await?,
        };

        if let Some(current) = resident.building {
            self.occupancy.remove_occupant(&current).await?;
        }

        let surroundings = self.navigator.look_around(&resident).await?;
        let Some(destination) = self.navigator.choose_building(&resident, surroundings) else {
            self.occupancy.leave(&resident).await?;
            debug!(resident = %resident.id, floor = %resident.floor, "Nowhere to go");
            return Ok(CycleOutcome::Stranded { settled });
        };

        let Some(building) = destination.building else {
            self.occupancy
                .occupy_empty_address(&resident, &destination.address)
                .await?;
            return Ok(CycleOutcome::Moved {
                settled,
                address: destination.address,
                started: None,
            });
        };

        self.occupancy.occupy_building(&resident, &building).await?;

        let mut started = None;
        if building.needs_processing() && !building.has_pending_action() {
            if let Some(action) = self.chooser.choose_action(&building) {
                self.coordinator
                    .start_processing(&building, &resident, &action, now)
                    .await?;
                started = Some(action);
            }
        }

        debug!(
            resident = %resident.id,
            address = %building.address,
            started = ?started,
            "Resident moved"
        );
        Ok(CycleOutcome::Moved {
            settled,
            address: building.address,
            started,
        })
    }

    /// Settle the resident's last action. `None` means it is still running.
    async fn settle(&self, resident: &ResidentDoc, now: DateTime<Utc>) -> Result<Option<Settled>> {
        let coordinator = &self.coordinator;

        let building = match resident.building {
            Some(id) => coordinator.stores().buildings.get(&id).await?,
            None => None,
        };
        let Some(building) = building else {
            info!(resident = %resident.id, "Processing resident has no building, releasing");
            coordinator.release_resident(resident).await?;
            return Ok(Some(Settled::Released));
        };

        let settled = match coordinator
            .lifecycle()
            .reconcile(&building, resident, now)
            .await?
        {
            Reconciliation::StillPending { .. } => return Ok(None),
            Reconciliation::Idle => {
                coordinator.release_resident(resident).await?;
                Settled::Released
            }
            Reconciliation::Completed {
                index,
                entry,
                outcome,
            } => {
                let report = coordinator
                    .finish_processing(&building, resident, index, &entry, &outcome, now)
                    .await?;
                Settled::Completed {
                    energy_gained: report.energy_gained,
                    processed: report.processed,
                }
            }
            Reconciliation::Discarded { entry, .. } => {
                coordinator
                    .abandon_processing(&building, resident, &entry)
                    .await?;
                Settled::Discarded
            }
            Reconciliation::Errored { entry, .. } => {
                coordinator
                    .abandon_processing(&building, resident, &entry)
                    .await?;
                Settled::Errored
            }
            Reconciliation::Orphaned { entry, .. } => {
                coordinator
                    .abandon_processing(&building, resident, &entry)
                    .await?;
                Settled::Orphaned
            }
            Reconciliation::Unsettled { entry, .. } => {
                coordinator
                    .resume_settlement(&building, resident, &entry)
                    .await?;
                match entry.status {
                    ActionState::Completed => Settled::Completed {
                        energy_gained: entry.energy_gained.unwrap_or_default(),
                        processed: building.processed,
                    },
                    ActionState::Errored => Settled::Errored,
                    _ => Settled::Discarded,
                }
            }
        };
        Ok(Some(settled))
    }

    async fn load_resident(&self, id: &ObjectId) -> Result<ResidentDoc> {
        self.coordinator
            .stores()
            .residents
            .get(id)
            .await?
            .ok_or_else(|| MiesError::NotFound(format!("resident {}", id)))
    }
}
