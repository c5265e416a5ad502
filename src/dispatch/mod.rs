//! Task dispatch
//!
//! Actions run outside the resident cycle. Submitting returns a handle at
//! once; the result is collected later with a single bounded-wait poll.
//! There is no cancellation: forgetting a handle only stops the engine from
//! waiting on it, and whatever the task eventually reports is dropped.
//!
//! Implementations:
//! - [`LocalDispatcher`]: in-process worker pool running registered
//!   [`ActionHandler`]s (single node, dev mode)
//! - [`NatsDispatcher`]: JetStream publish with a reply inbox (distributed
//!   workers)
//! - [`MockDispatcher`]: scripted outcomes for tests

pub mod local;
pub mod messages;
pub mod mock;
pub mod nats;
pub mod results;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::db::schemas::Content;
use crate::types::Result;

pub use local::{ActionHandler, ActionHandlers, LocalDispatcher, PassThroughHandler, PoolConfig};
pub use messages::{ActionRequest, ActionResponse};
pub use mock::{MockDispatcher, SubmittedTask};
pub use nats::{NatsDispatcher, NatsDispatcherConfig};
pub use results::ResultBoard;

/// Opaque reference to a submitted task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskHandle {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskHandle {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a finished task reported
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    /// Set when the task failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Share of the building's energy the task earned, in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_level: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Merged into the building's summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Content>,

    /// Merged into the building's payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Content>,

    /// Raw fetched content; triggers a full mirror rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Content>,

    /// Addresses of buildings the task produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,

    /// Expiry for the mirror rewrite triggered by `raw`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
}

impl TaskOutcome {
    pub fn succeeded() -> Self {
        Self::default()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_success_level(mut self, level: f64) -> Self {
        self.success_level = Some(level);
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn with_summary(mut self, summary: Content) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_payload(mut self, payload: Content) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_raw(mut self, raw: Content, ttl: Option<Duration>) -> Self {
        self.raw = Some(raw);
        self.cache_ttl_secs = ttl.map(|t| t.as_secs());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Success contribution used for the energy transfer; 1 unless the
    /// task reported a finite level
    pub fn success_contribution(&self) -> f64 {
        match self.success_level {
            Some(level) if level.is_finite() => level.clamp(0.0, 1.0),
            _ => 1.0,
        }
    }

    /// Whether the outcome carries content changes for the building
    pub fn has_content(&self) -> bool {
        self.content_type.is_some()
            || self.summary.is_some()
            || self.payload.is_some()
            || self.raw.is_some()
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }
}

/// Result of one bounded-wait poll
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPoll {
    NotReady,
    Ready(TaskOutcome),
}

impl TaskPoll {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Execution substrate for actions
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Hand the action off and return without waiting for it to run
    async fn submit(&self, action: &str, payload: Content) -> Result<TaskHandle>;

    /// Wait at most `wait` for a result. Absence of a result is
    /// [`TaskPoll::NotReady`], never an error.
    async fn poll(&self, handle: &TaskHandle, wait: Duration) -> Result<TaskPoll>;

    /// Stop tracking a handle; a later result for it is dropped
    fn forget(&self, handle: &TaskHandle);

    /// Dispatcher name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_contribution_defaults_and_clamps() {
        assert_eq!(TaskOutcome::succeeded().success_contribution(), 1.0);
        assert_eq!(
            TaskOutcome::succeeded()
                .with_success_level(0.25)
                .success_contribution(),
            0.25
        );
        assert_eq!(
            TaskOutcome::succeeded()
                .with_success_level(3.0)
                .success_contribution(),
            1.0
        );
        assert_eq!(
            TaskOutcome::succeeded()
                .with_success_level(-1.0)
                .success_contribution(),
            0.0
        );
        assert_eq!(
            TaskOutcome::succeeded()
                .with_success_level(f64::NAN)
                .success_contribution(),
            1.0
        );
    }

    #[test]
    fn test_failed_outcome() {
        let outcome = TaskOutcome::failed("boom");
        assert!(!outcome.is_success());
        assert!(!outcome.has_content());
    }

    #[test]
    fn test_outcome_wire_names() {
        let outcome = TaskOutcome::succeeded()
            .with_success_level(0.5)
            .with_content_type("article-text");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["successLevel"], 0.5);
        assert_eq!(json["contentType"], "article-text");
        assert!(json.get("error").is_none());
    }
}
