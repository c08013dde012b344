//! Synchronous reads of conversation history, fronted by the cache.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::cache::Cache;
use crate::adapters::persistence::{MessageFilter, Persistence, SortOrder};
use crate::core::error::Result;
use crate::core::message::MessageResponse;

/// Cache key of a one-to-one conversation. Order of the ids does not matter.
pub fn pair_key(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("message_list_{lo}_{hi}")
}

pub fn group_key(group_id: &str) -> String {
    format!("group_messagelist_{group_id}")
}

/// A group as listed for a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedGroup {
    pub group_id: String,
    pub group_name: String,
    pub avatar: String,
}

#[derive(Debug, Clone)]
pub struct MessageHistory {
    persistence: Arc<dyn Persistence>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl MessageHistory {
    pub fn new(persistence: Arc<dyn Persistence>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            persistence,
            cache,
            ttl,
        }
    }

    /// Both directions of the conversation between `a` and `b`, oldest first.
    pub async fn message_list(&self, a: &str, b: &str) -> Result<Vec<MessageResponse>> {
        let filter = MessageFilter::Conversation {
            a: a.to_string(),
            b: b.to_string(),
        };
        self.cached_list(&pair_key(a, b), &filter).await
    }

    pub async fn group_message_list(&self, group_id: &str) -> Result<Vec<MessageResponse>> {
        let filter = MessageFilter::ReceivedBy(group_id.to_string());
        self.cached_list(&group_key(group_id), &filter).await
    }

    pub async fn joined_groups(&self, user_id: &str) -> Result<Vec<JoinedGroup>> {
        let groups = self.persistence.joined_groups(user_id).await?;
        Ok(groups
            .into_iter()
            .map(|g| JoinedGroup {
                group_id: g.uuid,
                group_name: g.name,
                avatar: g.avatar,
            })
            .collect())
    }

    /// Appends one entry to a cached list if the list is cached. A miss is
    /// left alone: the next read rebuilds it from the store. Returns whether
    /// the cached list was updated.
    pub async fn append<T: Serialize>(&self, key: &str, entry: &T) -> Result<bool> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(false);
        };
        let mut list: Vec<serde_json::Value> = serde_json::from_slice(&raw)?;
        list.push(serde_json::to_value(entry)?);
        self.cache
            .set_ex(key, Bytes::from(serde_json::to_vec(&list)?), self.ttl)
            .await?;
        Ok(true)
    }

    async fn cached_list(&self, key: &str, filter: &MessageFilter) -> Result<Vec<MessageResponse>> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_slice(&raw) {
                Ok(list) => {
                    debug!(key, "history served from cache");
                    return Ok(list);
                }
                Err(e) => warn!(key, error = %e, "cached history unreadable; reloading"),
            },
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "cache read failed; reading store"),
        }

        let list: Vec<MessageResponse> = self
            .persistence
            .query_messages(filter, SortOrder::CreatedAsc)
            .await?
            .iter()
            .map(|m| m.to_response())
            .collect();

        let encoded = Bytes::from(serde_json::to_vec(&list)?);
        if let Err(e) = self.cache.set_ex(key, encoded, self.ttl).await {
            warn!(key, error = %e, "failed to populate history cache");
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(pair_key("U2", "U1"), "message_list_U1_U2");
        assert_eq!(pair_key("U1", "U2"), pair_key("U2", "U1"));
        assert_eq!(group_key("G7"), "group_messagelist_G7");
    }
}
