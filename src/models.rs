use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Username given to locally synthesized presence notices.
pub const SYSTEM_USERNAME: &str = "System";

/// The registered username record for this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Message,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub content: String,
    pub created_at: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

impl Message {
    /// Builds a presence notice stamped with the current wall clock.
    pub fn system(content: String, room_id: &str) -> Self {
        Message {
            id: now_millis(),
            content,
            created_at: now_rfc3339(),
            room_id: room_id.to_string(),
            user_id: 0,
            username: SYSTEM_USERNAME.to_string(),
            kind: MessageKind::System,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }

    /// Two chat messages are the same delivery when content, author and
    /// timestamp all match.
    pub fn same_delivery(&self, other: &Message) -> bool {
        self.content == other.content
            && self.username == other.username
            && self.created_at == other.created_at
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
