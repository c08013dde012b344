use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::error::{ChatError, Result};
use crate::core::message::Message;

/// A group and its member list, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub uuid: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub avatar: String,
    pub members: Vec<String>,
}

impl GroupInfo {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    /// Both directions of a one-to-one conversation.
    Conversation { a: String, b: String },
    /// Everything addressed to one receiver, e.g. a group.
    ReceivedBy(String),
}

impl MessageFilter {
    fn matches(&self, msg: &Message) -> bool {
        match self {
            MessageFilter::Conversation { a, b } => {
                (msg.send_id == *a && msg.receive_id == *b)
                    || (msg.send_id == *b && msg.receive_id == *a)
            }
            MessageFilter::ReceivedBy(id) => msg.receive_id == *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    CreatedAsc,
    CreatedDesc,
}

/// Relational store for messages and groups.
#[async_trait]
pub trait Persistence: Send + Sync + fmt::Debug {
    async fn insert_message(&self, message: &Message) -> Result<()>;
    async fn query_messages(&self, filter: &MessageFilter, order: SortOrder) -> Result<Vec<Message>>;
    async fn get_group(&self, group_id: &str) -> Result<Option<GroupInfo>>;
    async fn joined_groups(&self, user_id: &str) -> Result<Vec<GroupInfo>>;
}

/// In-process [`Persistence`] with failure injection.
#[derive(Debug)]
pub struct MemoryStore {
    messages: RwLock<Vec<Message>>,
    groups: DashMap<String, GroupInfo>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            groups: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn add_group(&self, group: GroupInfo) {
        self.groups.insert(group.uuid.clone(), group);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChatError::Persistence("store unavailable".into()))
        }
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn insert_message(&self, message: &Message) -> Result<()> {
        self.check()?;
        let mut messages = self.messages.write();
        if messages.iter().any(|m| m.uuid == message.uuid) {
            return Err(ChatError::Persistence(format!(
                "duplicate message uuid {}",
                message.uuid
            )));
        }
        messages.push(message.clone());
        Ok(())
    }

    async fn query_messages(&self, filter: &MessageFilter, order: SortOrder) -> Result<Vec<Message>> {
        self.check()?;
        let mut found: Vec<Message> = self
            .messages
            .read()
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for rows created within the same second.
        match order {
            SortOrder::CreatedAsc => found.sort_by(|x, y| x.created_at.cmp(&y.created_at)),
            SortOrder::CreatedDesc => found.sort_by(|x, y| y.created_at.cmp(&x.created_at)),
        }
        Ok(found)
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<GroupInfo>> {
        self.check()?;
        Ok(self.groups.get(group_id).map(|g| g.clone()))
    }

    async fn joined_groups(&self, user_id: &str) -> Result<Vec<GroupInfo>> {
        self.check()?;
        let mut groups: Vec<GroupInfo> = self
            .groups
            .iter()
            .filter(|g| g.has_member(user_id))
            .map(|g| g.clone())
            .collect();
        groups.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(groups)
    }
}
