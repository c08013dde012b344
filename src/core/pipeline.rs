//! Per-envelope processing: decode, persist, deliver, refresh caches.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::persistence::Persistence;
use crate::core::envelope::{ChatEnvelope, MessageType, Target};
use crate::core::error::Result;
use crate::core::history::{group_key, pair_key, MessageHistory};
use crate::core::message::Message;
use crate::core::session::{OutboundFrame, SessionRegistry};

/// What happened to one processed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Direct message; `delivered` counts recipient and sender echo.
    User { delivered: usize },
    /// `members` is the size of the stored member list.
    Group { delivered: usize, members: usize },
    /// Call signalling relayed to the callee only.
    Call { delivered: bool, persisted: bool },
    /// Group call frames are not relayed.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct FanOut {
    registry: Arc<SessionRegistry>,
    persistence: Arc<dyn Persistence>,
    history: Arc<MessageHistory>,
}

impl FanOut {
    pub fn new(
        registry: Arc<SessionRegistry>,
        persistence: Arc<dyn Persistence>,
        history: Arc<MessageHistory>,
    ) -> Self {
        Self {
            registry,
            persistence,
            history,
        }
    }

    /// Processes one encoded envelope. Errors abort this envelope only.
    pub async fn process(&self, bytes: &[u8]) -> Result<Delivery> {
        let envelope = ChatEnvelope::decode(bytes)?;
        match envelope.kind {
            MessageType::Text | MessageType::File => self.process_chat(&envelope).await,
            MessageType::AudioVideo => self.process_call(&envelope).await,
        }
    }

    async fn process_chat(&self, envelope: &ChatEnvelope) -> Result<Delivery> {
        let message = Message::from_envelope(envelope);
        self.persistence.insert_message(&message).await?;

        let response = message.to_response();
        let frame = OutboundFrame::new(message.uuid.clone(), serde_json::to_vec(&response)?);

        match envelope.target() {
            Some(Target::User(receiver)) => {
                let mut delivered = usize::from(self.registry.deliver(receiver, frame.clone()));
                // Echo to the sender unless they wrote to themselves.
                if message.send_id != receiver {
                    delivered += usize::from(self.registry.deliver(&message.send_id, frame));
                }
                self.refresh(&pair_key(&message.send_id, receiver), &response).await;
                debug!(uuid = %message.uuid, receiver, delivered, "direct message delivered");
                Ok(Delivery::User { delivered })
            }
            Some(Target::Group(group_id)) => {
                let Some(group) = self.persistence.get_group(group_id).await? else {
                    warn!(uuid = %message.uuid, group_id, "message to unknown group; stored but not delivered");
                    return Ok(Delivery::Group {
                        delivered: 0,
                        members: 0,
                    });
                };
                let delivered = self.registry.deliver_many(&group.members, &frame);
                self.refresh(&group_key(group_id), &response).await;
                debug!(uuid = %message.uuid, group_id, delivered, members = group.members.len(), "group message delivered");
                Ok(Delivery::Group {
                    delivered,
                    members: group.members.len(),
                })
            }
            // decode() guarantees a marked receiver
            None => Ok(Delivery::Ignored),
        }
    }

    async fn process_call(&self, envelope: &ChatEnvelope) -> Result<Delivery> {
        let signal = envelope.av_payload()?;
        let Some(Target::User(callee)) = envelope.target() else {
            debug!(receive_id = %envelope.receive_id, "call frame to a group ignored");
            return Ok(Delivery::Ignored);
        };

        let message = Message::from_envelope(envelope);
        let persisted = signal.is_persisted_signal();
        if persisted {
            self.persistence.insert_message(&message).await?;
        }

        let frame = OutboundFrame::new(
            message.uuid.clone(),
            serde_json::to_vec(&message.to_av_response())?,
        );
        let delivered = self.registry.deliver(callee, frame);
        debug!(signal = %signal.kind, callee, delivered, persisted, "call signal relayed");
        Ok(Delivery::Call {
            delivered,
            persisted,
        })
    }

    /// Best-effort cache refresh; the message is already stored and delivered.
    async fn refresh<T: serde::Serialize>(&self, key: &str, entry: &T) {
        match self.history.append(key, entry).await {
            Ok(true) => debug!(key, "cached history extended"),
            Ok(false) => {}
            Err(e) => warn!(key, error = %e, "cached history not updated"),
        }
    }
}
