//! Action status entries recorded on buildings
//!
//! Each dispatched action leaves one entry in the building's `actions`
//! array. An entry is open (PENDING) until it gets an `endedAt` stamp;
//! after that it never changes again.

use bson::oid::ObjectId;
use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Result tag that workers (or operators) write to mark a failed action
pub const ERROR_RESULT: &str = "ERROR";

/// Lifecycle state of one action entry
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    #[default]
    Pending,
    Completed,
    Discarded,
    Errored,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Discarded => "DISCARDED",
            Self::Errored => "ERRORED",
        };
        f.write_str(s)
    }
}

/// One action dispatched against a building
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatus {
    /// Registered action name (e.g. "fetch-article")
    pub action: String,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub started_at: DateTime<Utc>,

    /// Resident that dispatched the action
    pub started_by: ObjectId,

    /// Dispatcher handle used to poll for the result
    #[serde(rename = "result_id")]
    pub task_id: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_bson_datetime"
    )]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: ActionState,

    /// Outcome tag; `ERROR` marks a failed action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Whether the building counted as processed when the action started
    #[serde(default)]
    pub was_processed: bool,

    /// Energy moved to the resident, recorded when closed as COMPLETED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_gained: Option<f64>,
}

impl ActionStatus {
    /// A freshly dispatched, still open entry
    pub fn pending(
        action: impl Into<String>,
        started_by: ObjectId,
        task_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            action: action.into(),
            started_at: now,
            started_by,
            task_id: task_id.into(),
            ended_at: None,
            status: ActionState::Pending,
            result: None,
            was_processed: false,
            energy_gained: None,
        }
    }

    /// Open entries have no end timestamp
    pub fn is_pending(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether the outcome tag carries the error marker
    pub fn has_error_result(&self) -> bool {
        self.result.as_deref() == Some(ERROR_RESULT)
    }

    /// Copy of this entry closed with a terminal state
    pub fn closed(&self, state: ActionState, result: Option<String>, now: DateTime<Utc>) -> Self {
        let mut closed = self.clone();
        closed.ended_at = Some(now);
        closed.status = state;
        if result.is_some() {
            closed.result = result;
        }
        closed
    }
}

/// `Option<DateTime<Utc>>` stored as a BSON date
mod optional_bson_datetime {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => bson::DateTime::from_chrono(*dt).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(Option::<bson::DateTime>::deserialize(deserializer)?.map(|dt| dt.to_chrono()))
    }
}
