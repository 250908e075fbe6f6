use serde::{Deserialize, Serialize};

/// Fallback author when neither the frame nor the session names one.
pub const UNKNOWN_USERNAME: &str = "unknown";

/// Frames this client writes to the room channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join { username: String, room_id: String },
    #[serde(rename = "leave")]
    Leave { username: String, room_id: String },
    #[serde(rename = "message")]
    ChatMessage {
        content: String,
        username: String,
        room_id: String,
        user_id: i64,
        created_at: String,
    },
}

impl ClientMessage {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames the room channel delivers to this client.
///
/// Events this client does not know about decode to [`ServerMessage::Unknown`]
/// so newer servers can add events without breaking older clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ServerMessage {
    #[serde(rename = "message")]
    ChatMessage {
        message: ChatPayload,
        #[serde(default)]
        user_id: Option<i64>,
    },
    #[serde(rename = "join")]
    ParticipantJoined {
        #[serde(default)]
        username: Option<String>,
    },
    #[serde(rename = "leave")]
    ParticipantLeft {
        #[serde(default)]
        username: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// The nested `message` object of a chat frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatPayload {
    pub content: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
}

impl ChatPayload {
    /// Resolves the author: payload `username`, then payload `sender`, then
    /// the session's own username, then [`UNKNOWN_USERNAME`]. Empty strings
    /// count as absent.
    pub fn resolve_username(&self, own_username: Option<&str>) -> String {
        [
            self.username.as_deref(),
            self.sender.as_deref(),
            own_username,
        ]
        .into_iter()
        .flatten()
        .find(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_USERNAME)
        .to_string()
    }
}

/// Text of the notice shown when someone enters or leaves a room.
pub fn presence_notice(username: Option<&str>, joined: bool) -> String {
    let username = username
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_USERNAME);
    let verb = if joined { "joined" } else { "left" };
    format!("{username} has {verb} the room")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_frames_carry_the_event_tag() {
        let join = ClientMessage::Join {
            username: "alice".to_string(),
            room_id: "r1".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&join.to_text().unwrap()).unwrap();
        assert_eq!(value, json!({"event": "join", "username": "alice", "room_id": "r1"}));

        let chat = ClientMessage::ChatMessage {
            content: "hi".to_string(),
            username: "alice".to_string(),
            room_id: "r1".to_string(),
            user_id: 4,
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&chat.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "message");
        assert_eq!(value["user_id"], 4);
        assert_eq!(value["content"], "hi");
    }

    #[test]
    fn chat_frame_decodes_nested_message() {
        let frame = ServerMessage::parse(
            r#"{"event":"message","message":{"content":"yo","sender":"bob"},"user_id":9}"#,
        )
        .unwrap();
        match frame {
            ServerMessage::ChatMessage { message, user_id } => {
                assert_eq!(message.content, "yo");
                assert_eq!(message.sender.as_deref(), Some("bob"));
                assert_eq!(message.id, None);
                assert_eq!(user_id, Some(9));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn unknown_events_decode_to_unknown() {
        let frame = ServerMessage::parse(r#"{"event":"typing","username":"bob"}"#).unwrap();
        assert_eq!(frame, ServerMessage::Unknown);
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(ServerMessage::parse("not json").is_err());
        assert!(ServerMessage::parse(r#"{"event":"message"}"#).is_err());
        assert!(ServerMessage::parse(r#"{"username":"bob"}"#).is_err());
    }

    #[test]
    fn username_resolution_order() {
        let mut payload = ChatPayload {
            content: "x".to_string(),
            id: None,
            created_at: None,
            username: Some("carol".to_string()),
            sender: Some("bob".to_string()),
        };
        assert_eq!(payload.resolve_username(Some("alice")), "carol");

        payload.username = None;
        assert_eq!(payload.resolve_username(Some("alice")), "bob");

        payload.sender = Some(String::new());
        assert_eq!(payload.resolve_username(Some("alice")), "alice");

        payload.sender = None;
        assert_eq!(payload.resolve_username(None), UNKNOWN_USERNAME);
    }

    #[test]
    fn presence_notices() {
        assert_eq!(presence_notice(Some("bob"), true), "bob has joined the room");
        assert_eq!(presence_notice(Some("bob"), false), "bob has left the room");
        assert_eq!(presence_notice(None, true), "unknown has joined the room");
    }
}
