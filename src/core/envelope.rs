//! Inbound chat payloads as they arrive from connections, before persistence.

use serde::{Deserialize, Serialize};

use crate::core::error::{ChatError, Result};

/// Marker prefix of a user target id.
pub const USER_MARKER: char = 'U';
/// Marker prefix of a group target id.
pub const GROUP_MARKER: char = 'G';

/// Sentinel `messageId` carried by call-signalling frames that must be stored.
const PROXY_MARKER: &str = "PROXY";
const PERSISTED_CALL_SIGNALS: [&str; 3] = ["start_call", "receive_call", "reject_call"];

/// Wire discriminant of a chat payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Text,
    File,
    AudioVideo,
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Text),
            2 => Ok(MessageType::File),
            3 => Ok(MessageType::AudioVideo),
            other => Err(format!("unsupported message type {other}")),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Text => 0,
            MessageType::File => 2,
            MessageType::AudioVideo => 3,
        }
    }
}

/// Who a message is addressed to, derived from the receive id marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    User(&'a str),
    Group(&'a str),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMeta {
    pub file_size: String,
    pub file_type: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatEnvelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub session_id: String,
    pub send_id: String,
    #[serde(default)]
    pub send_name: String,
    #[serde(default)]
    pub send_avatar: String,
    pub receive_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(flatten)]
    pub file: FileMeta,
    /// Raw signalling JSON for audio/video frames.
    #[serde(default)]
    pub av_data: String,
}

impl ChatEnvelope {
    /// Decodes and validates an envelope from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: ChatEnvelope = serde_json::from_slice(bytes)?;
        if envelope.send_id.is_empty() {
            return Err(ChatError::InvalidEnvelope("empty send_id".into()));
        }
        if envelope.target().is_none() {
            return Err(ChatError::InvalidEnvelope(format!(
                "receive_id '{}' has no user/group marker",
                envelope.receive_id
            )));
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn target(&self) -> Option<Target<'_>> {
        let id = self.receive_id.as_str();
        match id.chars().next()? {
            USER_MARKER => Some(Target::User(id)),
            GROUP_MARKER => Some(Target::Group(id)),
            _ => None,
        }
    }

    pub fn av_payload(&self) -> Result<AvPayload> {
        Ok(serde_json::from_str(&self.av_data)?)
    }
}

/// The parts of a call-signalling frame the router looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AvPayload {
    #[serde(rename = "messageId", alias = "message_id")]
    pub message_id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AvPayload {
    /// Only call start/accept/reject frames relayed through the server are stored;
    /// media negotiation chatter is routed but never persisted.
    pub fn is_persisted_signal(&self) -> bool {
        self.message_id == PROXY_MARKER && PERSISTED_CALL_SIGNALS.contains(&self.kind.as_str())
    }
}
