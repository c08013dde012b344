use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::core::error::{ChatError, Result};
use crate::core::message::generate_id;

/// The list reads that can be offloaded to the task worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    LoadMessageList,
    LoadGroupMessageList,
    LoadJoinedGroupList,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [
        TaskType::LoadMessageList,
        TaskType::LoadGroupMessageList,
        TaskType::LoadJoinedGroupList,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::LoadMessageList => "load_message_list",
            TaskType::LoadGroupMessageList => "load_group_message_list",
            TaskType::LoadJoinedGroupList => "load_joined_group_list",
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            TaskType::LoadMessageList => "ML",
            TaskType::LoadGroupMessageList => "GML",
            TaskType::LoadJoinedGroupList => "JGL",
        }
    }

    /// Label used in result messages, e.g. "chat history loaded".
    pub fn describe(self) -> &'static str {
        match self {
            TaskType::LoadMessageList => "chat history",
            TaskType::LoadGroupMessageList => "group chat history",
            TaskType::LoadJoinedGroupList => "joined groups",
        }
    }
}

impl FromStr for TaskType {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ChatError::UnknownTask(s.to_string()))
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageListParams {
    pub user_one_id: String,
    pub user_two_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessageListParams {
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedGroupListParams {
    pub owner_id: String,
}

/// Typed parameters of a task, one variant per [`TaskType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskParams {
    MessageList(MessageListParams),
    GroupMessageList(GroupMessageListParams),
    JoinedGroupList(JoinedGroupListParams),
}

impl TaskParams {
    pub fn message_list(user_one_id: impl Into<String>, user_two_id: impl Into<String>) -> Self {
        TaskParams::MessageList(MessageListParams {
            user_one_id: user_one_id.into(),
            user_two_id: user_two_id.into(),
        })
    }

    pub fn group_message_list(group_id: impl Into<String>) -> Self {
        TaskParams::GroupMessageList(GroupMessageListParams {
            group_id: group_id.into(),
        })
    }

    pub fn joined_group_list(owner_id: impl Into<String>) -> Self {
        TaskParams::JoinedGroupList(JoinedGroupListParams {
            owner_id: owner_id.into(),
        })
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskParams::MessageList(_) => TaskType::LoadMessageList,
            TaskParams::GroupMessageList(_) => TaskType::LoadGroupMessageList,
            TaskParams::JoinedGroupList(_) => TaskType::LoadJoinedGroupList,
        }
    }

    /// Decodes the raw `parameters` object for the given task type.
    pub fn decode(task_type: TaskType, raw: Value) -> Result<Self> {
        Ok(match task_type {
            TaskType::LoadMessageList => TaskParams::MessageList(serde_json::from_value(raw)?),
            TaskType::LoadGroupMessageList => {
                TaskParams::GroupMessageList(serde_json::from_value(raw)?)
            }
            TaskType::LoadJoinedGroupList => {
                TaskParams::JoinedGroupList(serde_json::from_value(raw)?)
            }
        })
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            TaskParams::MessageList(p) => serde_json::to_value(p)?,
            TaskParams::GroupMessageList(p) => serde_json::to_value(p)?,
            TaskParams::JoinedGroupList(p) => serde_json::to_value(p)?,
        })
    }
}

/// Wire form of an offloaded read, as published on the task topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncTask {
    pub task_type: String,
    pub task_id: String,
    /// Session that receives the result.
    pub client_id: String,
    pub user_id: String,
    pub parameters: Value,
}

impl AsyncTask {
    pub fn new(params: &TaskParams, client_id: &str, user_id: &str) -> Result<Self> {
        let task_type = params.task_type();
        Ok(Self {
            task_type: task_type.as_str().to_string(),
            task_id: generate_id(task_type.id_prefix()),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            parameters: params.to_value()?,
        })
    }

    pub fn kind(&self) -> Result<TaskType> {
        self.task_type.parse()
    }

    pub fn params(&self) -> Result<TaskParams> {
        TaskParams::decode(self.kind()?, self.parameters.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncTaskResult {
    pub task_type: String,
    pub task_id: String,
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// Immediate reply to an offloaded request; the data follows later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingIndicator {
    pub loading: bool,
    pub task_id: String,
    pub message: String,
}

impl LoadingIndicator {
    pub fn for_task(task: &AsyncTask) -> Self {
        Self {
            loading: true,
            task_id: task.task_id.clone(),
            message: "loading, please wait".to_string(),
        }
    }
}
