//! Tick loop
//!
//! Every tick lists all residents and spawns one life event per resident.
//! Residents whose previous event is still running are skipped, so one
//! resident never runs two cycles at once. Cycles of different residents
//! run concurrently and fail independently.

use bson::oid::ObjectId;
use chrono::Utc;
use dashmap::DashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::event::LifeCycle;
use crate::store::ResidentStore;
use crate::types::Result;

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub spawned: usize,
    pub skipped: usize,
}

pub struct Scheduler {
    life: Arc<LifeCycle>,
    residents: Arc<dyn ResidentStore>,
    config: SchedulerConfig,
    in_flight: Arc<DashSet<ObjectId>>,
    tasks: Mutex<JoinSet<()>>,
}

/// Removes a resident from the in-flight set however its cycle ends
struct InFlightGuard {
    set: Arc<DashSet<ObjectId>>,
    id: ObjectId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

impl Scheduler {
    pub fn new(life: Arc<LifeCycle>, residents: Arc<dyn ResidentStore>, config: SchedulerConfig) -> Self {
        Self {
            life,
            residents,
            config,
            in_flight: Arc::new(DashSet::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Residents with a cycle currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Spawn one life event per idle resident
    pub async fn tick(&self) -> Result<TickReport> {
        let residents = self.residents.list().await?;
        let mut tasks = self.tasks.lock().await;

        // Reap finished cycles so the set does not grow without bound
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Resident cycle panicked: {}", e);
            }
        }

        let mut report = TickReport::default();
        for resident in residents {
            if !self.in_flight.insert(resident.id) {
                report.skipped += 1;
                continue;
            }
            let guard = InFlightGuard {
                set: Arc::clone(&self.in_flight),
                id: resident.id,
            };
            let life = Arc::clone(&self.life);

            tasks.spawn(async move {
                let _guard = guard;
                match life.handle_life_event(&resident.id, Utc::now()).await {
                    Ok(outcome) => debug!(resident = %resident.id, ?outcome, "Life event done"),
                    Err(e) if e.is_precondition() => {
                        warn!(resident = %resident.id, error = %e, "Life event refused")
                    }
                    Err(e) => error!(resident = %resident.id, error = %e, "Life event failed"),
                }
            });
            report.spawned += 1;
        }

        if report.skipped > 0 {
            debug!(skipped = report.skipped, "Residents still busy from an earlier tick");
        }
        Ok(report)
    }

    /// Tick until `shutdown` resolves, then wait for running cycles
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Scheduler started (tick every {}ms)",
            self.config.tick_interval.as_millis()
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Tick failed: {}", e);
                    }
                }
            }
        }

        info!("Scheduler stopping, waiting for {} running cycles", self.in_flight());
        self.drain().await;
        info!("Scheduler stopped");
    }

    /// Wait for every spawned cycle to finish
    pub async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Resident cycle panicked: {}", e);
            }
        }
    }
}
