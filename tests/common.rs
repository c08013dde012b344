#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;

use hybridchat::adapters::Connection;
use hybridchat::config::{Config, MessageMode};
use hybridchat::core::message::MessageResponse;
use hybridchat::{ChatError, Result};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        hybridchat::logging::init_logging();
    });
}

/// Connection that keeps every frame written to it.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    frames: Mutex<Vec<Bytes>>,
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn write_frame(&self, frame: Bytes) -> Result<()> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    /// Frames that decode as chat message responses.
    pub fn messages(&self) -> Vec<MessageResponse> {
        self.frames()
            .iter()
            .filter_map(|f| serde_json::from_slice(f).ok())
            .collect()
    }

    /// Frames that are JSON objects, notices excluded.
    pub fn json(&self) -> Vec<Value> {
        self.frames()
            .iter()
            .filter_map(|f| serde_json::from_slice::<Value>(f).ok())
            .filter(Value::is_object)
            .collect()
    }

    /// Waits up to two seconds for at least `n` frames.
    pub async fn wait_for(&self, n: usize) -> Vec<Bytes> {
        wait_until(|| self.frames.lock().len() >= n).await;
        self.frames()
    }
}

/// Connection whose every write fails, like a peer that went away.
#[derive(Debug)]
pub struct BrokenConnection;

#[async_trait]
impl Connection for BrokenConnection {
    async fn write_frame(&self, _frame: Bytes) -> Result<()> {
        Err(ChatError::Connection("broken pipe".into()))
    }
}

/// Polls `cond` every few milliseconds for up to two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Lets spawned writer pumps run for a moment.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn config(mode: MessageMode) -> Config {
    let mut cfg = Config::default();
    cfg.transport.message_mode = mode;
    cfg.transport.queue_capacity = 100;
    cfg.transport.threshold_ratio = 0.8;
    cfg.transport.sustain_ms = 5_000;
    cfg.transport.publish_timeout_ms = 200;
    cfg
}

pub fn text(from: &str, to: &str, content: &str) -> Bytes {
    Bytes::from(
        json!({
            "type": 0,
            "session_id": format!("{from}-{to}"),
            "send_id": from,
            "send_name": from.to_lowercase(),
            "send_avatar": "https://chat.example.com/static/avatars/default.png",
            "receive_id": to,
            "content": content,
        })
        .to_string(),
    )
}

pub fn call(from: &str, to: &str, message_id: &str, signal: &str) -> Bytes {
    let av = json!({ "messageId": message_id, "type": signal }).to_string();
    Bytes::from(
        json!({
            "type": 3,
            "send_id": from,
            "receive_id": to,
            "av_data": av,
        })
        .to_string(),
    )
}
