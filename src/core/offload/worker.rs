use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::adapters::durable_log::LogStream;
use crate::core::error::Result;
use crate::core::history::MessageHistory;
use crate::core::offload::run_read;
use crate::core::offload::task::{AsyncTask, AsyncTaskResult, TaskParams, TaskType};
use crate::core::session::{OutboundFrame, SessionRegistry};
use crate::core::shutdown::stopped;

/// Executes one kind of offloaded task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &AsyncTask) -> Result<Value>;

    /// Subject of the result message, e.g. "chat history".
    fn describe(&self) -> &str;
}

/// Serves the built-in list reads from [`MessageHistory`].
#[derive(Debug, Clone)]
pub struct HistoryHandler {
    task_type: TaskType,
    history: Arc<MessageHistory>,
}

impl HistoryHandler {
    pub fn new(task_type: TaskType, history: Arc<MessageHistory>) -> Self {
        Self { task_type, history }
    }
}

#[async_trait]
impl TaskHandler for HistoryHandler {
    async fn handle(&self, task: &AsyncTask) -> Result<Value> {
        let params = TaskParams::decode(self.task_type, task.parameters.clone())?;
        run_read(&self.history, &params).await
    }

    fn describe(&self) -> &str {
        self.task_type.describe()
    }
}

/// What the worker did with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A result (successful or not) was queued for the client.
    Delivered { success: bool },
    /// The requesting session is gone; the result was discarded.
    ClientGone,
    UnknownType,
    Malformed,
}

pub struct OffloadWorker {
    registry: Arc<SessionRegistry>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for OffloadWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("OffloadWorker").field("handlers", &kinds).finish()
    }
}

impl OffloadWorker {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            handlers: HashMap::new(),
        }
    }

    /// Worker with a handler for every built-in [`TaskType`].
    pub fn with_history(registry: Arc<SessionRegistry>, history: Arc<MessageHistory>) -> Self {
        let mut worker = Self::new(registry);
        for kind in TaskType::ALL {
            worker.register(kind.as_str(), HistoryHandler::new(kind, Arc::clone(&history)));
        }
        worker
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: impl TaskHandler + 'static) {
        self.handlers.insert(task_type.into(), Arc::new(handler));
    }

    /// Handles one record from the task topic.
    pub async fn process(&self, bytes: &[u8]) -> TaskOutcome {
        let task: AsyncTask = match serde_json::from_slice(bytes) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "undecodable task record dropped");
                return TaskOutcome::Malformed;
            }
        };

        let Some(handler) = self.handlers.get(&task.task_type) else {
            warn!(task_type = %task.task_type, task_id = %task.task_id, "no handler for task type; dropped");
            return TaskOutcome::UnknownType;
        };

        let result = match handler.handle(&task).await {
            Ok(data) => AsyncTaskResult {
                task_type: task.task_type.clone(),
                task_id: task.task_id.clone(),
                success: true,
                message: format!("{} loaded", handler.describe()),
                data,
            },
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "task failed");
                AsyncTaskResult {
                    task_type: task.task_type.clone(),
                    task_id: task.task_id.clone(),
                    success: false,
                    message: format!("failed to load {}: {e}", handler.describe()),
                    data: Value::Null,
                }
            }
        };

        let payload = match serde_json::to_vec(&result) {
            Ok(p) => p,
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "task result not encodable");
                return TaskOutcome::Malformed;
            }
        };

        if self
            .registry
            .deliver(&task.client_id, OutboundFrame::new(task.task_id.clone(), payload))
        {
            debug!(task_id = %task.task_id, client_id = %task.client_id, "task result delivered");
            TaskOutcome::Delivered {
                success: result.success,
            }
        } else {
            debug!(task_id = %task.task_id, client_id = %task.client_id, "client offline; task result discarded");
            TaskOutcome::ClientGone
        }
    }

    /// Consumes the task topic until the stream ends or shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut records: LogStream, mut shutdown: watch::Receiver<bool>) {
        info!("offload worker started");
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                next = records.next() => match next {
                    Some(Ok(record)) => {
                        self.process(&record.value).await;
                    }
                    Some(Err(e)) => warn!(error = %e, "task topic read failed"),
                    None => break,
                },
            }
        }
        info!("offload worker stopped");
    }
}
