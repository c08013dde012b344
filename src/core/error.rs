use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("local queue is full")]
    QueueFull,
    #[error("local queue is closed")]
    QueueClosed,
    #[error("broker publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("broker consume from '{topic}' failed: {reason}")]
    Consume { topic: String, reason: String },
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("unknown task type '{0}'")]
    UnknownTask(String),
    #[error("operation timed out")]
    Timeout,
    #[error("server is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ChatError {
    pub fn publish(topic: &str, reason: impl ToString) -> Self {
        ChatError::Publish {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::Connection(e.to_string())
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
