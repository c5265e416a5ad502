//! Result board shared by the dispatchers
//!
//! Every submitted handle gets a slot. Producers (pool workers, the NATS
//! reply listener) post outcomes into it; pollers wait on the slot's
//! `Notify` for at most their wait budget. A posted outcome stays on the
//! board until the handle is forgotten, so a poll that races a crash in the
//! caller sees the same result again next cycle.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use super::{TaskHandle, TaskOutcome, TaskPoll};
use crate::types::{MiesError, Result};

struct Slot {
    outcome: Option<TaskOutcome>,
    notify: Arc<Notify>,
}

#[derive(Default)]
pub struct ResultBoard {
    slots: DashMap<String, Slot>,
    dropped: AtomicU64,
}

impl ResultBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot for a freshly submitted handle
    pub fn register(&self, handle: &TaskHandle) {
        self.slots.insert(
            handle.as_str().to_string(),
            Slot {
                outcome: None,
                notify: Arc::new(Notify::new()),
            },
        );
    }

    /// Post an outcome. Returns `false` when the handle is unknown or was
    /// forgotten; such results are dropped.
    pub fn post(&self, task_id: &str, outcome: TaskOutcome) -> bool {
        match self.slots.get_mut(task_id) {
            Some(mut slot) => {
                slot.outcome = Some(outcome);
                // notify_one stores a permit when nobody is waiting yet
                slot.notify.notify_one();
                true
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(task_id, "Dropping result for unknown or forgotten task");
                false
            }
        }
    }

    /// Single bounded wait for a handle's outcome
    pub async fn wait(&self, handle: &TaskHandle, wait: Duration) -> Result<TaskPoll> {
        let notify = match self.slots.get(handle.as_str()) {
            Some(slot) => match &slot.outcome {
                Some(outcome) => return Ok(TaskPoll::Ready(outcome.clone())),
                None => Arc::clone(&slot.notify),
            },
            None => {
                return Err(MiesError::NotFound(format!(
                    "task {} is not tracked by this dispatcher",
                    handle
                )))
            }
        };

        if tokio::time::timeout(wait, notify.notified()).await.is_err() {
            debug!(task_id = %handle, "No result yet");
            return Ok(TaskPoll::NotReady);
        }

        Ok(self
            .slots
            .get(handle.as_str())
            .and_then(|slot| slot.outcome.clone())
            .map(TaskPoll::Ready)
            .unwrap_or(TaskPoll::NotReady))
    }

    pub fn forget(&self, handle: &TaskHandle) {
        self.slots.remove(handle.as_str());
    }

    pub fn is_tracked(&self, handle: &TaskHandle) -> bool {
        self.slots.contains_key(handle.as_str())
    }

    /// Handles still tracked (with or without a result)
    pub fn tracked_count(&self) -> usize {
        self.slots.len()
    }

    /// Results that arrived for handles nobody was waiting on
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
