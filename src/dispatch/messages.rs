//! Wire messages exchanged with remote action workers

use serde::{Deserialize, Serialize};

use super::TaskOutcome;
use crate::db::schemas::Content;

/// Stream holding dispatched actions
pub const STREAM_NAME: &str = "MIES_ACTIONS";

/// Subject prefix; the action name is appended (`actions.fetch-article`)
pub const SUBJECT_PREFIX: &str = "actions";

pub fn action_subject(action: &str) -> String {
    format!("{}.{}", SUBJECT_PREFIX, action)
}

/// Action published to workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Task handle, echoed back for correlation
    pub request_id: String,
    /// Subject the worker publishes its [`ActionResponse`] to
    pub reply_subject: String,
    pub action: String,
    pub payload: Content,
    /// Node that dispatched the action
    pub dispatcher_id: String,
}

/// Worker's answer to an [`ActionRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub request_id: String,
    pub worker_id: String,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}
