//! Realtime wire protocol.
//!
//! Every frame is a JSON text message shaped `{"event": <name>, "data": <payload>}`.
//!
//! Client -> Server:
//! ```json
//! {"event": "joinRoom", "data": "<group id>"}
//! {"event": "leaveRoom", "data": "<group id>"}
//! {"event": "sendMessage", "data": {"groupId": "<group id>", "content": "hi"}}
//! {"event": "loadHistory", "data": {"groupId": "<group id>", "before": 42}}
//! ```
//!
//! Server -> Client:
//! ```json
//! {"event": "allMessage", "data": {"groupId": "...", "messages": [...], "groupDescription": "...", "nextCursor": 12}}
//! {"event": "newMessage", "data": {"id": "...", "sender": {...}, "content": "hi", ...}}
//! {"event": "history", "data": {"groupId": "...", "messages": [...], "nextCursor": null}}
//! {"event": "error", "data": {"message": "Group not found"}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AccountStatus, ContentType, CredentialId, GroupId, MessageId, ProfileId, Role};

/// Point-in-time copy of a profile, embedded in session tokens and
/// returned by the verify endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub id: ProfileId,
    pub credential_id: CredentialId,
    pub display_name: String,
    pub phone: String,
    pub role: Role,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub region_id: String,
    pub account_status: AccountStatus,
}

/// Sender identity denormalised onto each delivered message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SenderView {
    pub id: ProfileId,
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender: SenderView,
    pub content: String,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Storage position; pass as `before` to page older history.
    pub cursor: i64,
}

/// Events a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinRoom(String),
    LeaveRoom(String),
    SendMessage {
        #[serde(default)]
        group_id: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        content_type: Option<ContentType>,
    },
    LoadHistory {
        group_id: String,
        #[serde(default)]
        before: Option<i64>,
    },
}

/// Events the gateway pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Broadcast to the whole room when a connection joins.
    AllMessage {
        group_id: GroupId,
        messages: Vec<MessageView>,
        group_description: String,
        next_cursor: Option<i64>,
    },
    /// Broadcast to the whole room after a message is persisted.
    NewMessage(MessageView),
    /// Older page, sent to the requesting connection only.
    History {
        group_id: GroupId,
        messages: Vec<MessageView>,
        next_cursor: Option<i64>,
    },
    /// Sent to the originating connection only.
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_room_wire_shape() {
        let event = ClientEvent::from_json(r#"{"event":"joinRoom","data":"abc"}"#).unwrap();
        assert_eq!(event, ClientEvent::JoinRoom("abc".into()));
    }

    #[test]
    fn test_send_message_missing_content_parses() {
        let event =
            ClientEvent::from_json(r#"{"event":"sendMessage","data":{"groupId":"g"}}"#).unwrap();
        match event {
            ClientEvent::SendMessage {
                group_id, content, ..
            } => {
                assert_eq!(group_id.as_deref(), Some("g"));
                assert!(content.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_error_event_shape() {
        let json = ServerEvent::error("Group not found").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["message"], "Group not found");
    }

    #[test]
    fn test_all_message_field_names() {
        let event = ServerEvent::AllMessage {
            group_id: GroupId::new(),
            messages: vec![],
            group_description: "Ward 3 canvassing".into(),
            next_cursor: None,
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "allMessage");
        assert_eq!(value["data"]["groupDescription"], "Ward 3 canvassing");
        assert!(value["data"]["messages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_photo_url_field() {
        let snapshot = ProfileSnapshot {
            id: ProfileId::new(),
            credential_id: CredentialId::new(),
            display_name: "Voter 1".into(),
            phone: "5551234567".into(),
            role: Role::Voter,
            photo_url: "x".into(),
            region_id: "r".into(),
            account_status: AccountStatus::Active,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["photoURL"], "x");
        assert_eq!(value["role"], "VOTER");
        assert_eq!(value["accountStatus"], "active");
    }
}
