//! Smell propagation hook
//!
//! When a building's energy changes its neighbours may want to know. The
//! engine only fires the notification; nothing waits for or depends on it,
//! so propagators report failures through logs instead of errors.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::nats::NatsClient;

/// Subject prefix; the building address is appended
pub const SMELL_SUBJECT_PREFIX: &str = "smell";

/// Notification body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmellEvent {
    pub address: String,
    pub energy: f64,
}

#[async_trait]
pub trait SmellPropagator: Send + Sync {
    /// Fire-and-forget notification of a building's new energy
    async fn propagate(&self, address: &str, energy: f64);
}

/// Stands in for a real propagator in dev mode
pub struct LogPropagator;

#[async_trait]
impl SmellPropagator for LogPropagator {
    async fn propagate(&self, address: &str, energy: f64) {
        debug!(address, energy, "Smell propagated");
    }
}

/// Publishes [`SmellEvent`]s on `smell.<address>`
pub struct NatsPropagator {
    client: NatsClient,
}

impl NatsPropagator {
    pub fn new(client: NatsClient) -> Self {
        Self { client }
    }

    pub fn subject(address: &str) -> String {
        format!("{}.{}", SMELL_SUBJECT_PREFIX, address)
    }
}

#[async_trait]
impl SmellPropagator for NatsPropagator {
    async fn propagate(&self, address: &str, energy: f64) {
        let event = SmellEvent {
            address: address.to_string(),
            energy,
        };
        let body = match serde_json::to_vec(&event) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!(address, error = %e, "Failed to encode smell event");
                return;
            }
        };

        if let Err(e) = self.client.publish(&Self::subject(address), body).await {
            warn!(address, error = %e, "Failed to propagate smell");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject() {
        assert_eq!(NatsPropagator::subject("a-1"), "smell.a-1");
    }

    #[test]
    fn test_event_shape() {
        let event = SmellEvent {
            address: "a-1".into(),
            energy: 0.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["address"], "a-1");
        assert_eq!(json["energy"], 0.0);
    }

    #[tokio::test]
    async fn test_log_propagator_never_fails() {
        LogPropagator.propagate("a-1", 12.0).await;
    }
}
