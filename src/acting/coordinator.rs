//! Energy and occupancy coordination
//!
//! Applies the outcome of an action to both parties:
//! - the resident gains `building energy * success contribution` and stops
//!   processing
//! - the building loses the same amount and becomes processed when that
//!   loss is strictly positive
//!
//! Completion commits in one building write: the entry is closed as
//! COMPLETED together with the new energy, processed flag and outputs. That
//! write is what makes a second finish fail. Then come the mirror
//! (best-effort), the smell hook, the resident (credit and clear
//! `processing`) and finally the floor counters. The resident's
//! `processing` flag marks the settlement as outstanding: if anything after
//! the commit fails, the next life event finds the closed entry and
//! `resume_settlement` finishes the job from what the entry recorded.
//! Counters move one key at a time and may lag the building record briefly.
//!
//! Counter moves per building:
//!
//! | event                         | from                      | to                        |
//! |-------------------------------|---------------------------|---------------------------|
//! | registered                    |                           | UNPROCESSED / PROCESSED   |
//! | action started                | UNPROCESSED / PROCESSED   | BEING_PROCESSED           |
//! | action finished               | BEING_PROCESSED           | PROCESSED / UNPROCESSED   |
//! | discarded, errored, orphaned  | BEING_PROCESSED           | state at start            |

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::lifecycle::{ActionLifecycle, LifecycleConfig};
use crate::cache::BuildingMirror;
use crate::db::schemas::{ActionState, ActionStatus, BuildingDoc, BuildingState, Content, ResidentDoc};
use crate::dispatch::{TaskDispatcher, TaskHandle, TaskOutcome, TaskPoll};
use crate::smell::SmellPropagator;
use crate::stats::FloorStats;
use crate::store::{BuildingStore, BuildingUpdate, ResidentStore, ResidentUpdate};
use crate::types::{MiesError, Result};

/// Energy bookkeeping settings
#[derive(Debug, Clone)]
pub struct EnergyConfig {
    /// Energy assumed for buildings that never had one set
    pub default_building_energy: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            default_building_energy: 50.0,
        }
    }
}

/// Shared stores the coordinator writes through
#[derive(Clone)]
pub struct Stores {
    pub buildings: Arc<dyn BuildingStore>,
    pub residents: Arc<dyn ResidentStore>,
    pub stats: Arc<dyn FloorStats>,
    pub mirror: Arc<BuildingMirror>,
}

/// What a finished action changed
#[derive(Debug, Clone, PartialEq)]
pub struct FinishReport {
    pub energy_gained: f64,
    pub building_energy: f64,
    pub processed: bool,
    pub closed: ActionStatus,
}

pub struct Coordinator {
    stores: Stores,
    dispatcher: Arc<dyn TaskDispatcher>,
    smell: Arc<dyn SmellPropagator>,
    lifecycle: ActionLifecycle,
    config: EnergyConfig,
    degraded_payloads: AtomicU64,
}

impl Coordinator {
    pub fn new(
        stores: Stores,
        dispatcher: Arc<dyn TaskDispatcher>,
        smell: Arc<dyn SmellPropagator>,
        lifecycle: LifecycleConfig,
        config: EnergyConfig,
    ) -> Self {
        let lifecycle =
            ActionLifecycle::new(Arc::clone(&stores.buildings), Arc::clone(&dispatcher), lifecycle);
        Self {
            stores,
            dispatcher,
            smell,
            lifecycle,
            config,
            degraded_payloads: AtomicU64::new(0),
        }
    }

    pub fn lifecycle(&self) -> &ActionLifecycle {
        &self.lifecycle
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn energy_config(&self) -> &EnergyConfig {
        &self.config
    }

    /// Payloads dispatched without raw content
    pub fn degraded_payloads(&self) -> u64 {
        self.degraded_payloads.load(Ordering::Relaxed)
    }

    /// Insert a new building and count it on its floor
    pub async fn register_building(&self, mut building: BuildingDoc) -> Result<BuildingDoc> {
        // Raw content lives in the mirror only
        let raw = building.raw.take();
        let id = self.stores.buildings.insert(building.clone()).await?;

        self.stores
            .stats
            .increment(&building.floor, settled_state(building.processed))
            .await?;

        building.raw = raw;
        self.stores.mirror.put_building(&building, None).await;

        info!(address = %building.address, floor = %building.floor, %id, "Building registered");
        Ok(building)
    }

    /// Merge payload, then raw content, then summary into the outbound
    /// payload. Later keys win.
    pub async fn build_payload(&self, building: &BuildingDoc) -> Content {
        let mut payload = building.payload.clone().unwrap_or_default();

        let raw = match self.stores.mirror.get_building(&building.address).await {
            Some(mut cached) => match cached.remove("raw") {
                Some(Value::Object(raw)) => Some(raw),
                _ => building.raw.clone(),
            },
            None => building.raw.clone(),
        };

        match raw {
            Some(raw) => payload.extend(raw),
            None => {
                self.degraded_payloads.fetch_add(1, Ordering::Relaxed);
                warn!(
                    address = %building.address,
                    "No raw content for building, dispatching degraded payload"
                );
            }
        }

        payload.extend(building.summary.clone());
        payload
    }

    /// Dispatch `action` against `building` on behalf of `resident`
    pub async fn start_processing(
        &self,
        building: &BuildingDoc,
        resident: &ResidentDoc,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionStatus> {
        if building.has_pending_action() {
            return Err(MiesError::InvalidTransition(format!(
                "building {} already has an open action",
                building.address
            )));
        }

        let payload = self.build_payload(building).await;
        let handle = self.dispatcher.submit(action, payload).await?;

        let entry = match self
            .lifecycle
            .begin(building, resident, action, &handle, now)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                self.dispatcher.forget(&handle);
                return Err(e);
            }
        };

        self.update_resident(
            resident,
            ResidentUpdate {
                processing: Some(true),
                ..Default::default()
            },
        )
        .await?;

        let stats = &self.stores.stats;
        stats
            .decrement(&building.floor, settled_state(building.processed))
            .await?;
        stats
            .increment(&building.floor, BuildingState::BeingProcessed)
            .await?;

        Ok(entry)
    }

    /// Close a completed action and move its energy
    pub async fn finish_processing(
        &self,
        building: &BuildingDoc,
        resident: &ResidentDoc,
        index: usize,
        entry: &ActionStatus,
        outcome: &TaskOutcome,
        now: DateTime<Utc>,
    ) -> Result<FinishReport> {
        let building_energy = building.energy_or(self.config.default_building_energy);
        let energy_gained = building_energy * outcome.success_contribution();
        let energy_change = -energy_gained;
        let new_energy = building_energy + energy_change;
        let processed = energy_change < 0.0;

        let update = BuildingUpdate {
            energy: Some(new_energy),
            processed: Some(processed),
            outputs: outcome.outputs.clone(),
            ..Default::default()
        };
        let closed = self
            .lifecycle
            .complete(building, index, entry, energy_gained, update.clone(), now)
            .await?;

        let mut current = building.clone();
        update.apply_to(&mut current);
        if let Some(slot) = current.actions.get_mut(index) {
            *slot = closed.clone();
        }
        self.merge_into_mirror(&building.address, &update).await;
        self.smell.propagate(&building.address, new_energy).await;

        if processed && !building.processed {
            info!(address = %building.address, floor = %building.floor, "Building processed");
        } else if !processed && building.processed {
            warn!(
                address = %building.address,
                floor = %building.floor,
                "Processed building re-opened by an action that moved no energy"
            );
        }

        self.settle_completion(&current, resident, &closed, Some(outcome))
            .await?;

        info!(
            address = %building.address,
            action = %entry.action,
            energy_gained,
            building_energy = new_energy,
            processed,
            "Action completed"
        );

        Ok(FinishReport {
            energy_gained,
            building_energy: new_energy,
            processed,
            closed,
        })
    }

    /// Finish settling an entry that was closed while its resident was
    /// still processing.
    pub async fn resume_settlement(
        &self,
        building: &BuildingDoc,
        resident: &ResidentDoc,
        entry: &ActionStatus,
    ) -> Result<()> {
        match entry.status {
            ActionState::Pending => Err(MiesError::InvalidTransition(format!(
                "action on building {} is still open",
                building.address
            ))),
            ActionState::Completed => {
                // The outcome is only needed for content; it may be gone
                let handle = TaskHandle::from(entry.task_id.as_str());
                let outcome = match self
                    .dispatcher
                    .poll(&handle, self.lifecycle.config().poll_wait)
                    .await
                {
                    Ok(TaskPoll::Ready(outcome)) if outcome.is_success() => Some(outcome),
                    _ => None,
                };
                if outcome.is_none() {
                    debug!(task_id = %handle, "Result gone, settling without content");
                }

                self.merge_into_mirror(
                    &building.address,
                    &BuildingUpdate {
                        energy: building.energy,
                        processed: Some(building.processed),
                        outputs: building.outputs.clone(),
                        ..Default::default()
                    },
                )
                .await;
                self.smell
                    .propagate(&building.address, building.energy_or(self.config.default_building_energy))
                    .await;

                self.settle_completion(building, resident, entry, outcome.as_ref())
                    .await?;
                info!(
                    address = %building.address,
                    action = %entry.action,
                    energy_gained = entry.energy_gained.unwrap_or_default(),
                    "Interrupted completion settled"
                );
                Ok(())
            }
            ActionState::Discarded | ActionState::Errored => {
                self.abandon_processing(building, resident, entry).await
            }
        }
    }

    /// Credit the resident, then move the counters, then apply content.
    /// `building` is the record as committed with `entry`.
    async fn settle_completion(
        &self,
        building: &BuildingDoc,
        resident: &ResidentDoc,
        entry: &ActionStatus,
        outcome: Option<&TaskOutcome>,
    ) -> Result<()> {
        self.update_resident(
            resident,
            ResidentUpdate {
                processing: Some(false),
                energy_delta: Some(entry.energy_gained.unwrap_or_default()),
                ..Default::default()
            },
        )
        .await?;
        self.dispatcher.forget(&TaskHandle::from(entry.task_id.as_str()));

        let stats = &self.stores.stats;
        stats
            .decrement(&building.floor, BuildingState::BeingProcessed)
            .await?;
        stats
            .increment(&building.floor, settled_state(building.processed))
            .await?;

        if let Some(outcome) = outcome.filter(|o| o.has_content()) {
            self.apply_results(
                building,
                outcome.content_type.as_deref(),
                outcome.summary.as_ref(),
                outcome.payload.as_ref(),
                outcome.raw.as_ref(),
                outcome.cache_ttl(),
            )
            .await?;
        }
        Ok(())
    }

    /// Undo the bookkeeping of an action that will never finish. The
    /// building returns to the state it was counted under when `entry`
    /// started.
    pub async fn abandon_processing(
        &self,
        building: &BuildingDoc,
        resident: &ResidentDoc,
        entry: &ActionStatus,
    ) -> Result<()> {
        self.release_resident(resident).await?;

        let stats = &self.stores.stats;
        stats
            .decrement(&building.floor, BuildingState::BeingProcessed)
            .await?;
        stats
            .increment(&building.floor, settled_state(entry.was_processed))
            .await?;
        Ok(())
    }

    /// Clear the resident's processing flag, nothing else
    pub async fn release_resident(&self, resident: &ResidentDoc) -> Result<()> {
        self.update_resident(
            resident,
            ResidentUpdate {
                processing: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Merge an action's content into the building.
    ///
    /// Summary and payload deltas are shallow-merged (new keys win); the
    /// content type is only written when it changed. With `raw` the whole
    /// record is rewritten into the mirror under `cache_ttl`, otherwise the
    /// changed fields are merged into it.
    pub async fn apply_results(
        &self,
        building: &BuildingDoc,
        content_type: Option<&str>,
        summary_delta: Option<&Content>,
        result_delta: Option<&Content>,
        raw: Option<&Content>,
        cache_ttl: Option<Duration>,
    ) -> Result<BuildingDoc> {
        let mut update = BuildingUpdate::default();

        if let Some(delta) = summary_delta {
            let mut summary = building.summary.clone();
            summary.extend(delta.clone());
            update.summary = Some(summary);
        }
        if let Some(delta) = result_delta {
            let mut payload = building.payload.clone().unwrap_or_default();
            payload.extend(delta.clone());
            update.payload = Some(payload);
        }
        if let Some(content_type) = content_type {
            if building.content_type.as_deref() != Some(content_type) {
                update.content_type = Some(content_type.to_string());
            }
        }

        let mut updated = building.clone();
        update.apply_to(&mut updated);

        if !update.is_empty()
            && !self.stores.buildings.update(&building.id, update.clone()).await?
        {
            return Err(MiesError::NotFound(format!("building {}", building.id)));
        }

        match raw {
            Some(raw) => {
                updated.raw = Some(raw.clone());
                self.stores.mirror.put_building(&updated, cache_ttl).await;
            }
            None => self.merge_into_mirror(&building.address, &update).await,
        }

        debug!(address = %building.address, "Action results applied");
        Ok(updated)
    }

    async fn merge_into_mirror(&self, address: &str, update: &BuildingUpdate) {
        match update.mirror_fields() {
            Ok(fields) => {
                self.stores.mirror.merge_update(address, &fields).await;
            }
            Err(e) => warn!(address, error = %e, "Failed to project update for the mirror"),
        }
    }

    async fn update_resident(&self, resident: &ResidentDoc, update: ResidentUpdate) -> Result<()> {
        if !self.stores.residents.update(&resident.id, update).await? {
            return Err(MiesError::NotFound(format!("resident {}", resident.id)));
        }
        Ok(())
    }
}

/// Counter a building sits in while nobody is working on it
fn settled_state(processed: bool) -> BuildingState {
    if processed {
        BuildingState::Processed
    } else {
        BuildingState::Unprocessed
    }
}
