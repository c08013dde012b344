use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::envelope::{ChatEnvelope, FileMeta, MessageType};

/// Layout of `created_at` in every outbound shape and cached list.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// File size stored on rows that carry no file.
const NO_FILE_SIZE: &str = "0B";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Unsent,
    Sent,
    Read,
}

/// A persisted chat message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: String,
    pub session_id: String,
    pub kind: MessageType,
    pub content: String,
    pub url: String,
    pub send_id: String,
    pub send_name: String,
    pub send_avatar: String,
    pub receive_id: String,
    pub file: FileMeta,
    pub av_data: String,
    pub status: MessageStatus,
    pub created_at: NaiveDateTime,
}

impl Message {
    /// Builds the row for an inbound envelope. Only the fields that belong to the
    /// envelope's type are carried over; everything else gets its empty sentinel.
    pub fn from_envelope(env: &ChatEnvelope) -> Self {
        let (content, url, file, av_data) = match env.kind {
            MessageType::Text => (
                env.content.clone(),
                String::new(),
                FileMeta {
                    file_size: NO_FILE_SIZE.to_string(),
                    ..FileMeta::default()
                },
                String::new(),
            ),
            MessageType::File => (String::new(), env.url.clone(), env.file.clone(), String::new()),
            MessageType::AudioVideo => (
                String::new(),
                String::new(),
                FileMeta::default(),
                env.av_data.clone(),
            ),
        };

        Message {
            uuid: generate_id("M"),
            session_id: env.session_id.clone(),
            kind: env.kind,
            content,
            url,
            send_id: env.send_id.clone(),
            send_name: env.send_name.clone(),
            send_avatar: normalize_avatar(&env.send_avatar),
            receive_id: env.receive_id.clone(),
            file,
            av_data,
            status: MessageStatus::Unsent,
            created_at: Local::now().naive_local(),
        }
    }

    pub fn to_response(&self) -> MessageResponse {
        MessageResponse {
            send_id: self.send_id.clone(),
            send_name: self.send_name.clone(),
            send_avatar: self.send_avatar.clone(),
            receive_id: self.receive_id.clone(),
            kind: self.kind,
            content: self.content.clone(),
            url: self.url.clone(),
            file_size: self.file.file_size.clone(),
            file_name: self.file.file_name.clone(),
            file_type: self.file.file_type.clone(),
            created_at: self.created_at.format(CREATED_AT_FORMAT).to_string(),
        }
    }

    pub fn to_av_response(&self) -> AvMessageResponse {
        AvMessageResponse {
            message: self.to_response(),
            av_data: self.av_data.clone(),
        }
    }
}

/// Outbound shape of a chat message, shared by direct and group conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub send_id: String,
    pub send_name: String,
    pub send_avatar: String,
    pub receive_id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    pub url: String,
    pub file_size: String,
    pub file_name: String,
    pub file_type: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvMessageResponse {
    #[serde(flatten)]
    pub message: MessageResponse,
    pub av_data: String,
}

/// Strips any scheme, host or IP prefix from an avatar reference so that only
/// the server-relative path is stored.
pub fn normalize_avatar(raw: &str) -> String {
    if let Some(idx) = raw.find("/static/") {
        return raw[idx..].to_string();
    }

    let (rest, had_scheme) = match raw.find("://") {
        Some(i) => (&raw[i + 3..], true),
        None => (raw, false),
    };
    if rest.starts_with('/') {
        return rest.to_string();
    }
    match rest.find('/') {
        Some(i) if had_scheme || looks_like_host(&rest[..i]) => rest[i..].to_string(),
        None if had_scheme => "/".to_string(),
        _ => raw.to_string(),
    }
}

fn looks_like_host(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

/// Generates a prefixed identifier, e.g. `M3f2a…` for messages.
pub fn generate_id(prefix: &str) -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(20);
    format!("{prefix}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(kind: MessageType) -> ChatEnvelope {
        ChatEnvelope {
            kind,
            session_id: "S1".into(),
            send_id: "U1".into(),
            send_name: "ann".into(),
            send_avatar: "https://10.0.0.7:8000/static/avatars/ann.png".into(),
            receive_id: "U2".into(),
            content: "hello".into(),
            url: "/static/files/f.bin".into(),
            file: FileMeta {
                file_size: "3KB".into(),
                file_type: "bin".into(),
                file_name: "f.bin".into(),
            },
            av_data: r#"{"messageId":"PROXY","type":"start_call"}"#.into(),
        }
    }

    #[test]
    fn text_rows_drop_file_and_av_fields() {
        let msg = Message::from_envelope(&envelope(MessageType::Text));
        assert_eq!(msg.content, "hello");
        assert!(msg.url.is_empty());
        assert_eq!(msg.file.file_size, "0B");
        assert!(msg.file.file_name.is_empty());
        assert!(msg.av_data.is_empty());
        assert_eq!(msg.status, MessageStatus::Unsent);
        assert!(msg.uuid.starts_with('M'));
    }

    #[test]
    fn file_rows_keep_only_file_fields() {
        let msg = Message::from_envelope(&envelope(MessageType::File));
        assert!(msg.content.is_empty());
        assert_eq!(msg.url, "/static/files/f.bin");
        assert_eq!(msg.file.file_name, "f.bin");
        assert!(msg.av_data.is_empty());
    }

    #[test]
    fn avatar_origin_is_stripped() {
        assert_eq!(
            normalize_avatar("https://10.0.0.7:8000/static/avatars/ann.png"),
            "/static/avatars/ann.png"
        );
        assert_eq!(normalize_avatar("http://cdn.example.com/a/b.png"), "/a/b.png");
        assert_eq!(normalize_avatar("192.168.1.2:8000/img/x.png"), "/img/x.png");
        assert_eq!(normalize_avatar("/static/avatars/x.png"), "/static/avatars/x.png");
        assert_eq!(normalize_avatar("avatars/x.png"), "avatars/x.png");
        assert_eq!(normalize_avatar(""), "");
    }

    #[test]
    fn av_response_flattens_message_fields() {
        let msg = Message::from_envelope(&envelope(MessageType::AudioVideo));
        let json = serde_json::to_value(msg.to_av_response()).unwrap();
        assert_eq!(json["type"], 3);
        assert_eq!(json["send_avatar"], "/static/avatars/ann.png");
        assert!(json["av_data"].as_str().unwrap().contains("start_call"));
    }
}
