//! Error types for mies
//!
//! One error enum for the whole engine; each variant carries a human-readable
//! message so failures can be logged as-is by the scheduler.

/// Main error type for mies operations
#[derive(Debug, thiserror::Error)]
pub enum MiesError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored record is missing fields the data model requires
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The action state machine refused the requested transition
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MiesError {
    /// Whether this error means the stored data breaks a model invariant
    /// rather than an infrastructure hiccup
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::InvalidRecord(_) | Self::InvalidTransition(_))
    }
}

// Implement From conversions for common error types

impl From<mongodb::error::Error> for MiesError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for MiesError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encode error: {}", err))
    }
}

impl From<bson::de::Error> for MiesError {
    fn from(err: bson::de::Error) -> Self {
        Self::InvalidRecord(err.to_string())
    }
}

impl From<serde_json::Error> for MiesError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<async_nats::Error> for MiesError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

/// Result type alias for mies operations
pub type Result<T> = std::result::Result<T, MiesError>;
