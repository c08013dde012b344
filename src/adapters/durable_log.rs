//! Durable, partitioned log used as overflow transport and async-task bus.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, BoxStream};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::core::error::{ChatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub key: Bytes,
    pub value: Bytes,
    pub offset: u64,
}

/// Records of one topic as seen by one consumer group.
pub type LogStream = BoxStream<'static, Result<LogRecord>>;

#[async_trait]
pub trait DurableLog: Send + Sync + fmt::Debug {
    /// Appends `value` to `topic`. Safe to call concurrently from many workers.
    async fn publish(&self, topic: &str, key: &[u8], value: Bytes) -> Result<()>;

    /// Joins `group` on `topic`. Consumers sharing a group split the records
    /// between them; every record is handed to exactly one of them.
    async fn consume(&self, topic: &str, group: &str) -> Result<LogStream>;

    /// Closes writers and ends every open consumer stream.
    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct TopicLog {
    records: RwLock<Vec<LogRecord>>,
    groups: DashMap<String, Arc<AtomicU64>>,
    notify: Notify,
}

impl TopicLog {
    fn cursor(&self, group: &str) -> Arc<AtomicU64> {
        // New groups start from the earliest record.
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// Claims the next unread record for a group cursor, if any.
    fn claim(&self, cursor: &AtomicU64) -> Option<LogRecord> {
        loop {
            let next = cursor.load(Ordering::Acquire);
            let records = self.records.read();
            let record = records.get(next as usize)?;
            if cursor
                .compare_exchange(next, next + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(record.clone());
            }
        }
    }
}

/// In-process [`DurableLog`] with consumer-group cursors and failure injection.
#[derive(Debug)]
pub struct MemoryLog {
    topics: DashMap<String, Arc<TopicLog>>,
    available: AtomicBool,
    closed: Arc<AtomicBool>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            available: AtomicBool::new(true),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// When unavailable every publish fails, as if the broker were unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of everything ever published to `topic`.
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        self.topics
            .get(topic)
            .map(|t| t.records.read().clone())
            .unwrap_or_default()
    }

    fn topic(&self, name: &str) -> Arc<TopicLog> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicLog::default()))
            .clone()
    }
}

#[async_trait]
impl DurableLog for MemoryLog {
    async fn publish(&self, topic: &str, key: &[u8], value: Bytes) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::publish(topic, "log is closed"));
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(ChatError::publish(topic, "broker unavailable"));
        }

        let log = self.topic(topic);
        {
            let mut records = log.records.write();
            let offset = records.len() as u64;
            records.push(LogRecord {
                topic: topic.to_string(),
                key: Bytes::copy_from_slice(key),
                value,
                offset,
            });
            debug!(target: "hybridchat::log", topic, offset, "record appended");
        }
        log.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, topic: &str, group: &str) -> Result<LogStream> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::Consume {
                topic: topic.to_string(),
                reason: "log is closed".into(),
            });
        }

        let log = self.topic(topic);
        let cursor = log.cursor(group);
        let closed = Arc::clone(&self.closed);

        let records = stream::unfold((log, cursor, closed), |(log, cursor, closed)| async move {
            loop {
                // Register interest before checking so a publish in between is not missed.
                let notified = log.notify.notified();
                if closed.load(Ordering::SeqCst) {
                    return None;
                }
                if let Some(record) = log.claim(&cursor) {
                    drop(notified);
                    return Some((Ok(record), (log, cursor, closed)));
                }
                notified.await;
            }
        });
        Ok(Box::pin(records))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        for topic in self.topics.iter() {
            topic.value().notify.notify_waiters();
        }
        Ok(())
    }
}
