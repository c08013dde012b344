use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::durable_log::DurableLog;
use crate::core::error::{ChatError, Result};
use crate::core::history::MessageHistory;
use crate::core::offload::run_read;
use crate::core::offload::task::{AsyncTask, LoadingIndicator, TaskParams};

/// Answer to an offload request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AsyncReply {
    /// Published; the result arrives later as an `AsyncTaskResult` frame.
    Loading(LoadingIndicator),
    /// Answered synchronously.
    Inline(Value),
}

#[derive(Debug, Clone)]
pub struct OffloadRequester {
    /// `None` disables offloading; every request is answered inline.
    log: Option<Arc<dyn DurableLog>>,
    topic: String,
    publish_timeout: Duration,
    history: Arc<MessageHistory>,
}

impl OffloadRequester {
    pub fn new(
        log: Option<Arc<dyn DurableLog>>,
        topic: impl Into<String>,
        publish_timeout: Duration,
        history: Arc<MessageHistory>,
    ) -> Self {
        Self {
            log,
            topic: topic.into(),
            publish_timeout,
            history,
        }
    }

    /// Publishes a task for `client_id`. Any failure to hand the task off
    /// falls back to running the read here.
    pub async fn request(&self, params: TaskParams, client_id: &str) -> Result<AsyncReply> {
        let Some(log) = &self.log else {
            return self.inline(&params).await;
        };

        match self.publish(log.as_ref(), &params, client_id).await {
            Ok(task) => {
                info!(task_id = %task.task_id, task_type = %task.task_type, client_id, "read offloaded");
                Ok(AsyncReply::Loading(LoadingIndicator::for_task(&task)))
            }
            Err(e) => {
                warn!(task_type = %params.task_type(), client_id, error = %e, "offload failed; answering inline");
                self.inline(&params).await
            }
        }
    }

    async fn publish(
        &self,
        log: &dyn DurableLog,
        params: &TaskParams,
        client_id: &str,
    ) -> Result<AsyncTask> {
        let task = AsyncTask::new(params, client_id, client_id)?;
        let payload = Bytes::from(serde_json::to_vec(&task)?);
        tokio::time::timeout(
            self.publish_timeout,
            log.publish(&self.topic, task.task_id.as_bytes(), payload),
        )
        .await
        .map_err(|_| ChatError::Timeout)??;
        Ok(task)
    }

    async fn inline(&self, params: &TaskParams) -> Result<AsyncReply> {
        run_read(&self.history, params).await.map(AsyncReply::Inline)
    }
}
