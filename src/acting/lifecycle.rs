//! Action lifecycle
//!
//! ```text
//!            begin                poll: ready, success
//!  (absent) ------> PENDING ------------------------------> COMPLETED
//!                     |  \
//!                     |   \ poll: ready, failure
//!                     |    `----------------------------> ERRORED
//!                     |
//!                     | not ready AND (age >= discard_after OR result == "ERROR")
//!                     `-----------------------------------> DISCARDED
//! ```
//!
//! Only the latest entry of a building can be open. Closing is a
//! compare-and-set on the stored entry, so an entry is closed at most once
//! no matter how many callers race on it.
//!
//! A resident stays `processing` until its own entry is both closed and
//! settled. An entry found closed while its resident is still processing
//! was interrupted between the two and is reported as `Unsettled`.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::schemas::{ActionState, ActionStatus, BuildingDoc, ResidentDoc, ERROR_RESULT};
use crate::dispatch::{TaskDispatcher, TaskHandle, TaskOutcome, TaskPoll};
use crate::store::{BuildingStore, BuildingUpdate};
use crate::types::{MiesError, Result};

/// Lifecycle timing
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Open entries at least this old are discarded
    pub discard_after: Duration,
    /// Budget for a single result poll
    pub poll_wait: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            discard_after: Duration::from_secs(24 * 60 * 60),
            poll_wait: Duration::from_secs(1),
        }
    }
}

/// Why an open entry was given up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Older than the discard threshold
    Stale,
    /// The entry's result carries the error marker
    ErrorResult,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale => f.write_str("stale"),
            Self::ErrorResult => f.write_str("error result"),
        }
    }
}

/// What reconciling a resident's last action found
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Nothing of this resident's on the building
    Idle,
    /// Another resident appended after ours. Our entry has been closed as
    /// DISCARDED and its task forgotten.
    Orphaned { index: usize, entry: ActionStatus },
    /// Our entry is closed but the resident was never settled
    Unsettled { index: usize, entry: ActionStatus },
    /// Still running; the cycle must stop here
    StillPending { index: usize },
    /// Ready and successful; the entry is still open until finished
    Completed {
        index: usize,
        entry: ActionStatus,
        outcome: TaskOutcome,
    },
    /// Closed as DISCARDED
    Discarded {
        index: usize,
        entry: ActionStatus,
        reason: DiscardReason,
    },
    /// Closed as ERRORED
    Errored {
        index: usize,
        entry: ActionStatus,
        error: String,
    },
}

impl Reconciliation {
    /// Whether the resident has to wait before doing anything else
    pub fn blocks_cycle(&self) -> bool {
        matches!(self, Self::StillPending { .. })
    }
}

pub struct ActionLifecycle {
    buildings: Arc<dyn BuildingStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: LifecycleConfig,
}

impl ActionLifecycle {
    pub fn new(
        buildings: Arc<dyn BuildingStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            buildings,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Append a PENDING entry for a dispatched task
    pub async fn begin(
        &self,
        building: &BuildingDoc,
        started_by: &ResidentDoc,
        action: &str,
        handle: &TaskHandle,
        now: DateTime<Utc>,
    ) -> Result<ActionStatus> {
        if building.has_pending_action() {
            return Err(MiesError::InvalidTransition(format!(
                "building {} already has an open action",
                building.address
            )));
        }

        let mut entry = ActionStatus::pending(action, started_by.id, handle.as_str(), now);
        entry.was_processed = building.processed;
        let update = BuildingUpdate {
            push_action: Some(entry.clone()),
            ..Default::default()
        };
        if !self.buildings.update(&building.id, update).await? {
            return Err(MiesError::NotFound(format!("building {}", building.id)));
        }

        info!(
            address = %building.address,
            action,
            task_id = %handle,
            resident = %started_by.id,
            "Action started"
        );
        Ok(entry)
    }

    /// Close the open entry at `index`. Fails with `InvalidTransition` when
    /// the stored entry is already terminal.
    pub async fn close(
        &self,
        building: &BuildingDoc,
        index: usize,
        entry: &ActionStatus,
        state: ActionState,
        result: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ActionStatus> {
        if !state.is_terminal() {
            return Err(MiesError::InvalidTransition(format!(
                "cannot close an action as {}",
                state
            )));
        }

        let closed = entry.closed(state, result, now);
        self.commit(building, index, closed.clone(), BuildingUpdate::default())
            .await?;

        self.dispatcher.forget(&TaskHandle::from(entry.task_id.as_str()));
        Ok(closed)
    }

    /// Close the open entry at `index` as COMPLETED together with the
    /// building's energy change in one write. The task handle stays tracked
    /// until the resident is settled.
    pub async fn complete(
        &self,
        building: &BuildingDoc,
        index: usize,
        entry: &ActionStatus,
        energy_gained: f64,
        update: BuildingUpdate,
        now: DateTime<Utc>,
    ) -> Result<ActionStatus> {
        let mut closed = entry.closed(ActionState::Completed, None, now);
        closed.energy_gained = Some(energy_gained);
        self.commit(building, index, closed.clone(), update).await?;
        Ok(closed)
    }

    async fn commit(
        &self,
        building: &BuildingDoc,
        index: usize,
        closed: ActionStatus,
        update: BuildingUpdate,
    ) -> Result<()> {
        if !self
            .buildings
            .close_action(&building.id, index, closed, update)
            .await?
        {
            return Err(MiesError::InvalidTransition(format!(
                "action {} on building {} is already closed",
                index, building.address
            )));
        }
        Ok(())
    }

    /// Whether an open entry should be given up on at `now`
    pub fn should_discard(&self, entry: &ActionStatus, now: DateTime<Utc>) -> Option<DiscardReason> {
        if entry.has_error_result() {
            return Some(DiscardReason::ErrorResult);
        }
        // A start time in the future (clock skew) is never stale
        let age = now.signed_duration_since(entry.started_at).to_std().ok()?;
        if age >= self.config.discard_after {
            Some(DiscardReason::Stale)
        } else {
            None
        }
    }

    pub async fn discard(
        &self,
        building: &BuildingDoc,
        index: usize,
        entry: &ActionStatus,
        reason: DiscardReason,
        now: DateTime<Utc>,
    ) -> Result<ActionStatus> {
        let closed = self
            .close(building, index, entry, ActionState::Discarded, None, now)
            .await?;
        info!(
            address = %building.address,
            action = %entry.action,
            task_id = %entry.task_id,
            %reason,
            "Action discarded"
        );
        Ok(closed)
    }

    /// Settle the resident's last action on `building`
    pub async fn reconcile(
        &self,
        building: &BuildingDoc,
        resident: &ResidentDoc,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation> {
        let Some((index, entry)) = building.latest_action() else {
            return Ok(Reconciliation::Idle);
        };

        if entry.started_by != resident.id {
            return self.orphan(building, resident, entry, now).await;
        }

        if !entry.is_pending() {
            warn!(
                address = %building.address,
                resident = %resident.id,
                status = %entry.status,
                "Action closed but resident not settled"
            );
            return Ok(Reconciliation::Unsettled {
                index,
                entry: entry.clone(),
            });
        }

        let handle = TaskHandle::from(entry.task_id.as_str());
        match self.dispatcher.poll(&handle, self.config.poll_wait).await {
            Ok(TaskPoll::Ready(outcome)) if outcome.is_success() => {
                return Ok(Reconciliation::Completed {
                    index,
                    entry: entry.clone(),
                    outcome,
                });
            }
            Ok(TaskPoll::Ready(outcome)) => {
                let error = outcome.error.unwrap_or_default();
                let closed = self
                    .close(
                        building,
                        index,
                        entry,
                        ActionState::Errored,
                        Some(ERROR_RESULT.to_string()),
                        now,
                    )
                    .await?;
                info!(
                    address = %building.address,
                    action = %entry.action,
                    error = %error,
                    "Action failed"
                );
                return Ok(Reconciliation::Errored {
                    index,
                    entry: closed,
                    error,
                });
            }
            Ok(TaskPoll::NotReady) => {}
            Err(e) => {
                debug!(task_id = %handle, error = %e, "Result poll failed, treating as not ready");
            }
        }

        if let Some(reason) = self.should_discard(entry, now) {
            let closed = self.discard(building, index, entry, reason, now).await?;
            return Ok(Reconciliation::Discarded {
                index,
                entry: closed,
                reason,
            });
        }

        debug!(address = %building.address, action = %entry.action, "Action still pending");
        Ok(Reconciliation::StillPending { index })
    }

    /// `latest` was appended by someone else. Find the resident's own most
    /// recent entry and give it up.
    async fn orphan(
        &self,
        building: &BuildingDoc,
        resident: &ResidentDoc,
        latest: &ActionStatus,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation> {
        let own = building
            .actions
            .iter()
            .enumerate()
            .rev()
            .find(|(_, entry)| entry.started_by == resident.id);

        match own {
            None => Ok(Reconciliation::Idle),
            Some((index, entry)) if entry.is_pending() => {
                warn!(
                    address = %building.address,
                    resident = %resident.id,
                    superseded_by = %latest.started_by,
                    task_id = %entry.task_id,
                    "Resident's action was superseded by another resident"
                );
                let closed = self
                    .close(building, index, entry, ActionState::Discarded, None, now)
                    .await?;
                Ok(Reconciliation::Orphaned {
                    index,
                    entry: closed,
                })
            }
            Some((index, entry)) => Ok(Reconciliation::Unsettled {
                index,
                entry: entry.clone(),
            }),
        }
    }
}
