//! NATS client wrapper
//!
//! Connection management for the dispatcher and the smell publisher. Both
//! share one connection; JetStream contexts are derived from it on demand.

use async_nats::{jetstream, Client, ConnectOptions};
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::{MiesError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    name: String,
}

impl NatsClient {
    /// Connect without retrying: a missing server should fail fast so the
    /// binary can fall back to in-process dispatch in dev mode
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| MiesError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn jetstream(&self) -> jetstream::Context {
        jetstream::new(self.client.clone())
    }

    /// Core (non-JetStream) publish
    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| MiesError::Nats(format!("Publish failed: {}", e)))
    }

    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| MiesError::Nats(format!("Subscribe failed: {}", e)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
