//! In-process worker pool
//!
//! Runs actions on a fixed set of tokio tasks fed from a bounded queue:
//! - Fixed number of workers, no per-action spawn
//! - Submissions are rejected (not queued unboundedly) when the queue is full
//! - Each action runs under a timeout; a timeout is a failed outcome
//!
//! Use this for single-node and dev deployments. Use NATS for distributed
//! workers.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::results::ResultBoard;
use super::{TaskDispatcher, TaskHandle, TaskOutcome, TaskPoll};
use crate::db::schemas::Content;
use crate::types::{MiesError, Result};

/// Executes one kind of action against a payload
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, action: &str, payload: &Content) -> TaskOutcome;

    fn can_handle(&self, action: &str) -> bool;
}

/// Collection of action handlers; the first that can handle an action wins
pub struct ActionHandlers {
    handlers: Vec<Box<dyn ActionHandler>>,
}

impl ActionHandlers {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn ActionHandler>) {
        self.handlers.push(handler);
    }

    pub fn find_handler(&self, action: &str) -> Option<&dyn ActionHandler> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(action))
            .map(|h| h.as_ref())
    }
}

impl Default for ActionHandlers {
    fn default() -> Self {
        let mut handlers = Self::new();
        handlers.register(Box::new(PassThroughHandler));
        handlers
    }
}

/// Completes every action at once and records it in the summary
pub struct PassThroughHandler;

#[async_trait]
impl ActionHandler for PassThroughHandler {
    async fn execute(&self, action: &str, _payload: &Content) -> TaskOutcome {
        let mut summary = Content::new();
        summary.insert("lastAction".into(), Value::String(action.to_string()));
        TaskOutcome::succeeded().with_summary(summary)
    }

    fn can_handle(&self, _action: &str) -> bool {
        true
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_count: usize,
    /// Maximum queued actions before submissions are rejected
    pub max_queue_size: usize,
    /// Per-action execution timeout
    pub task_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queue_size: 1000,
            task_timeout: Duration::from_secs(300),
        }
    }
}

struct PoolRequest {
    task_id: String,
    action: String,
    payload: Content,
}

pub struct LocalDispatcher {
    request_tx: mpsc::Sender<PoolRequest>,
    board: Arc<ResultBoard>,
    busy_workers: Arc<AtomicUsize>,
    worker_count: usize,
}

impl LocalDispatcher {
    /// Create the pool and start its workers
    pub fn new(config: PoolConfig, handlers: ActionHandlers) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<PoolRequest>(config.max_queue_size.max(1));
        let request_rx = Arc::new(Mutex::new(request_rx));
        let handlers = Arc::new(handlers);
        let board = Arc::new(ResultBoard::new());
        let busy_workers = Arc::new(AtomicUsize::new(0));

        for i in 0..config.worker_count {
            let request_rx = Arc::clone(&request_rx);
            let handlers = Arc::clone(&handlers);
            let board = Arc::clone(&board);
            let busy_workers = Arc::clone(&busy_workers);
            let task_timeout = config.task_timeout;

            tokio::spawn(async move {
                worker_task(i, request_rx, handlers, board, busy_workers, task_timeout).await;
            });
        }

        info!("Worker pool started with {} workers", config.worker_count);

        Self {
            request_tx,
            board,
            busy_workers,
            worker_count: config.worker_count,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default(), ActionHandlers::default())
    }

    /// Workers currently executing an action
    pub fn busy_count(&self) -> usize {
        self.busy_workers.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn board(&self) -> &ResultBoard {
        &self.board
    }
}

#[async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn submit(&self, action: &str, payload: Content) -> Result<TaskHandle> {
        let handle = TaskHandle::generate();
        self.board.register(&handle);

        let request = PoolRequest {
            task_id: handle.as_str().to_string(),
            action: action.to_string(),
            payload,
        };

        if let Err(e) = self.request_tx.try_send(request) {
            self.board.forget(&handle);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    MiesError::Dispatch("Worker pool queue is full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    MiesError::Dispatch("Worker pool closed".into())
                }
            });
        }

        debug!(action, task_id = %handle, "Queued action");
        Ok(handle)
    }

    async fn poll(&self, handle: &TaskHandle, wait: Duration) -> Result<TaskPoll> {
        self.board.wait(handle, wait).await
    }

    fn forget(&self, handle: &TaskHandle) {
        self.board.forget(handle);
    }

    fn name(&self) -> &str {
        "local"
    }
}

async fn worker_task(
    worker_id: usize,
    request_rx: Arc<Mutex<mpsc::Receiver<PoolRequest>>>,
    handlers: Arc<ActionHandlers>,
    board: Arc<ResultBoard>,
    busy_workers: Arc<AtomicUsize>,
    task_timeout: Duration,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let request = {
            let mut rx = request_rx.lock().await;
            match rx.recv().await {
                Some(r) => r,
                None => {
                    info!("Worker {} shutting down (channel closed)", worker_id);
                    return;
                }
            }
        };

        busy_workers.fetch_add(1, Ordering::Relaxed);
        debug!(worker_id, action = %request.action, task_id = %request.task_id, "Executing action");

        let outcome = match handlers.find_handler(&request.action) {
            Some(handler) => {
                match tokio::time::timeout(
                    task_timeout,
                    handler.execute(&request.action, &request.payload),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => TaskOutcome::failed(format!(
                        "action {} timed out after {:?}",
                        request.action, task_timeout
                    )),
                }
            }
            None => {
                warn!(action = %request.action, "No handler registered for action");
                TaskOutcome::failed(format!("no handler for action {}", request.action))
            }
        };

        board.post(&request.task_id, outcome);
        busy_workers.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowHandler;

    #[async_trait]
    impl ActionHandler for SlowHandler {
        async fn execute(&self, _action: &str, _payload: &Content) -> TaskOutcome {
            tokio::time::sleep(Duration::from_secs(60)).await;
            TaskOutcome::succeeded()
        }

        fn can_handle(&self, action: &str) -> bool {
            action == "slow"
        }
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_queue_size, 1000);
    }

    #[test]
    fn test_handler_lookup() {
        let mut handlers = ActionHandlers::new();
        assert!(handlers.find_handler("slow").is_none());
        handlers.register(Box::new(SlowHandler));
        assert!(handlers.find_handler("slow").is_some());
        assert!(handlers.find_handler("fetch-article").is_none());
    }

    #[tokio::test]
    async fn test_pass_through_completes() {
        let pool = LocalDispatcher::with_defaults();
        let handle = pool.submit("fetch-article", Content::new()).await.unwrap();

        let poll = pool.poll(&handle, Duration::from_secs(1)).await.unwrap();
        match poll {
            TaskPoll::Ready(outcome) => {
                assert!(outcome.is_success());
                assert_eq!(outcome.summary.unwrap()["lastAction"], "fetch-article");
            }
            TaskPoll::NotReady => panic!("pass-through should finish within a second"),
        }
    }

    #[tokio::test]
    async fn test_missing_handler_fails_task() {
        let pool = LocalDispatcher::new(PoolConfig::default(), ActionHandlers::new());
        let handle = pool.submit("fetch-article", Content::new()).await.unwrap();

        let poll = pool.poll(&handle, Duration::from_secs(1)).await.unwrap();
        assert!(matches!(poll, TaskPoll::Ready(outcome) if !outcome.is_success()));
    }

    #[tokio::test]
    async fn test_slow_action_is_not_ready() {
        let mut handlers = ActionHandlers::new();
        handlers.register(Box::new(SlowHandler));
        let pool = LocalDispatcher::new(PoolConfig::default(), handlers);

        let handle = pool.submit("slow", Content::new()).await.unwrap();
        let poll = pool.poll(&handle, Duration::from_millis(20)).await.unwrap();
        assert_eq!(poll, TaskPoll::NotReady);

        pool.forget(&handle);
        assert!(!pool.board().is_tracked(&handle));
    }

    #[tokio::test]
    async fn test_full_queue_rejects_submission() {
        let config = PoolConfig {
            worker_count: 0,
            max_queue_size: 1,
            ..Default::default()
        };
        let pool = LocalDispatcher::new(config, ActionHandlers::default());

        pool.submit("a", Content::new()).await.unwrap();
        let err = pool.submit("b", Content::new()).await.unwrap_err();
        assert!(matches!(err, MiesError::Dispatch(_)));
        assert_eq!(pool.board().tracked_count(), 1);
    }
}
