//! Offloading of heavy list reads onto the broker's task topic.
//!
//! The requester publishes an [`AsyncTask`] and answers with a
//! [`LoadingIndicator`]; a worker in the task consumer group runs the read and
//! pushes an [`AsyncTaskResult`] to the requesting session.

pub mod requester;
pub mod task;
pub mod worker;

pub use requester::{AsyncReply, OffloadRequester};
pub use task::{
    AsyncTask, AsyncTaskResult, GroupMessageListParams, JoinedGroupListParams, LoadingIndicator,
    MessageListParams, TaskParams, TaskType,
};
pub use worker::{HistoryHandler, OffloadWorker, TaskHandler, TaskOutcome};

use serde_json::Value;

use crate::core::error::Result;
use crate::core::history::MessageHistory;

/// Runs the synchronous read behind a task. Shared by the worker and by the
/// requester's inline fallback, so the fallback never re-enters the broker.
pub async fn run_read(history: &MessageHistory, params: &TaskParams) -> Result<Value> {
    Ok(match params {
        TaskParams::MessageList(p) => {
            serde_json::to_value(history.message_list(&p.user_one_id, &p.user_two_id).await?)?
        }
        TaskParams::GroupMessageList(p) => {
            serde_json::to_value(history.group_message_list(&p.group_id).await?)?
        }
        TaskParams::JoinedGroupList(p) => {
            serde_json::to_value(history.joined_groups(&p.owner_id).await?)?
        }
    })
}
