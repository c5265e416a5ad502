//! JetStream dispatcher
//!
//! Publishes [`ActionRequest`]s to the `MIES_ACTIONS` stream and collects
//! [`ActionResponse`]s from a per-dispatcher reply inbox. Publishing waits
//! only for the JetStream ack, never for the action itself.

use async_nats::jetstream::{self, stream::Stream};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::messages::{action_subject, ActionRequest, ActionResponse, STREAM_NAME, SUBJECT_PREFIX};
use super::results::ResultBoard;
use super::{TaskDispatcher, TaskHandle, TaskPoll};
use crate::db::schemas::Content;
use crate::nats::NatsClient;
use crate::types::{MiesError, Result};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct NatsDispatcherConfig {
    /// Identifies this node's reply inbox
    pub dispatcher_id: String,
    /// How long unconsumed actions stay in the stream
    pub max_age: Duration,
}

impl Default for NatsDispatcherConfig {
    fn default() -> Self {
        Self {
            dispatcher_id: uuid::Uuid::new_v4().to_string(),
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct NatsDispatcher {
    config: NatsDispatcherConfig,
    client: NatsClient,
    jetstream: jetstream::Context,
    board: Arc<ResultBoard>,
}

impl NatsDispatcher {
    pub async fn new(client: NatsClient, config: NatsDispatcherConfig) -> Result<Self> {
        info!("Dispatcher {} using NATS ({})", config.dispatcher_id, client.name());

        let jetstream = client.jetstream();
        let dispatcher = Self {
            config,
            client,
            jetstream,
            board: Arc::new(ResultBoard::new()),
        };

        dispatcher.ensure_stream().await?;
        dispatcher.start_response_listener().await?;

        Ok(dispatcher)
    }

    async fn ensure_stream(&self) -> Result<Stream> {
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![format!("{}.>", SUBJECT_PREFIX)],
                max_age: self.config.max_age,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| MiesError::Nats(format!("Failed to create stream: {}", e)))?;

        info!("Using stream {} for actions", STREAM_NAME);
        Ok(stream)
    }

    fn reply_subject(&self) -> String {
        format!("_INBOX.mies.{}", self.config.dispatcher_id)
    }

    async fn start_response_listener(&self) -> Result<()> {
        let reply_subject = self.reply_subject();
        let mut subscriber = self.client.subscribe(&reply_subject).await?;

        info!("Listening for action results on {}", reply_subject);

        let board = Arc::clone(&self.board);
        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<ActionResponse>(&msg.payload) {
                    Ok(response) => {
                        debug!(
                            task_id = %response.request_id,
                            worker = %response.worker_id,
                            "Received action result"
                        );
                        board.post(&response.request_id, response.outcome);
                    }
                    Err(e) => {
                        error!("Failed to parse action response: {}", e);
                    }
                }
            }
            info!("Action result listener stopped");
        });

        Ok(())
    }

    /// Publish and wait for the JetStream ack
    async fn publish(&self, subject: &str, body: Vec<u8>) -> Result<()> {
        self.jetstream
            .publish(subject.to_string(), body.into())
            .await
            .map_err(|e| MiesError::Nats(format!("Failed to publish action: {}", e)))?
            .await
            .map_err(|e| MiesError::Nats(format!("Failed to confirm publish: {}", e)))?;
        Ok(())
    }

    /// Handles still awaiting a result or a forget
    pub fn pending_count(&self) -> usize {
        self.board.tracked_count()
    }
}

#[async_trait]
impl TaskDispatcher for NatsDispatcher {
    async fn submit(&self, action: &str, payload: Content) -> Result<TaskHandle> {
        let handle = TaskHandle::generate();
        let request = ActionRequest {
            request_id: handle.as_str().to_string(),
            reply_subject: self.reply_subject(),
            action: action.to_string(),
            payload,
            dispatcher_id: self.config.dispatcher_id.clone(),
        };
        let request_json = serde_json::to_vec(&request)
            .map_err(|e| MiesError::Dispatch(format!("Failed to serialize action: {}", e)))?;

        // Register before publishing so a fast worker cannot outrun us
        self.board.register(&handle);

        let subject = action_subject(action);
        if let Err(e) = self.publish(&subject, request_json).await {
            self.board.forget(&handle);
            return Err(e);
        }

        debug!(task_id = %handle, subject = %subject, "Published action");
        Ok(handle)
    }

    async fn poll(&self, handle: &TaskHandle, wait: Duration) -> Result<TaskPoll> {
        self.board.wait(handle, wait).await
    }

    fn forget(&self, handle: &TaskHandle) {
        self.board.forget(handle);
    }

    fn name(&self) -> &str {
        "nats"
    }
}
