//! Scripted dispatcher for tests

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::results::ResultBoard;
use super::{TaskDispatcher, TaskHandle, TaskOutcome, TaskPoll};
use crate::db::schemas::Content;
use crate::types::{MiesError, Result};

/// One recorded submission
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedTask {
    pub handle: TaskHandle,
    pub action: String,
    pub payload: Content,
}

/// Dispatcher whose outcomes are decided by the test
///
/// Actions complete when the test calls [`MockDispatcher::resolve`], or at
/// submit time when an outcome was scripted for the action name.
#[derive(Default)]
pub struct MockDispatcher {
    board: ResultBoard,
    scripted: DashMap<String, TaskOutcome>,
    submitted: Mutex<Vec<SubmittedTask>>,
    reject_submissions: AtomicBool,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every future submission of `action` with `outcome`
    pub fn script(&self, action: &str, outcome: TaskOutcome) {
        self.scripted.insert(action.to_string(), outcome);
    }

    /// Post an outcome for an already submitted handle
    pub fn resolve(&self, handle: &TaskHandle, outcome: TaskOutcome) -> bool {
        self.board.post(handle.as_str(), outcome)
    }

    /// Make `submit` fail until turned off again
    pub fn reject_submissions(&self, reject: bool) {
        self.reject_submissions.store(reject, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> Vec<SubmittedTask> {
        self.submitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last_submitted(&self) -> Option<SubmittedTask> {
        self.submitted().pop()
    }

    pub fn is_tracked(&self, handle: &TaskHandle) -> bool {
        self.board.is_tracked(handle)
    }
}

#[async_trait]
impl TaskDispatcher for MockDispatcher {
    async fn submit(&self, action: &str, payload: Content) -> Result<TaskHandle> {
        if self.reject_submissions.load(Ordering::Relaxed) {
            return Err(MiesError::Dispatch("submissions rejected".into()));
        }

        let handle = TaskHandle::generate();
        self.board.register(&handle);
        self.submitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SubmittedTask {
                handle: handle.clone(),
                action: action.to_string(),
                payload,
            });

        if let Some(outcome) = self.scripted.get(action) {
            self.board.post(handle.as_str(), outcome.clone());
        }
        Ok(handle)
    }

    async fn poll(&self, handle: &TaskHandle, wait: Duration) -> Result<TaskPoll> {
        self.board.wait(handle, wait).await
    }

    fn forget(&self, handle: &TaskHandle) {
        self.board.forget(handle);
    }

    fn name(&self) -> &str {
        "mock"
    }
}
