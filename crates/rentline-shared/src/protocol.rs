//! Realtime hub protocol.
//!
//! Every websocket frame is a JSON text frame tagged by a `type` field.
//! Clients send [`ClientCommand`]s to the chat hub; the server pushes
//! [`ServerEvent`]s on both the chat and the statistics hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ConversationId, ConversationStatus, Priority, UserId};

/// Commands accepted by the chat hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Subscribe this connection to a conversation's broadcast group
    Join { conversation_id: ConversationId },

    /// Unsubscribe this connection from a conversation's broadcast group
    Leave { conversation_id: ConversationId },

    /// Post a message into an existing conversation
    SendMessage {
        conversation_id: ConversationId,
        text: String,
    },

    /// Assign a staff member to a conversation (staff only)
    AssignStaff {
        conversation_id: ConversationId,
        staff_id: UserId,
    },

    /// Open a new conversation with its first message (customers only)
    StartConversation {
        subject: String,
        #[serde(default)]
        priority: Priority,
        text: String,
    },

    /// Open or close a conversation
    SetStatus {
        conversation_id: ConversationId,
        status: ConversationStatus,
    },

    Ping,
}

/// Events pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// A message was posted to a conversation this connection joined
    ReceiveMessage { message: ChatMessage },

    /// A staff member took over a conversation
    StaffAssigned {
        conversation_id: ConversationId,
        staff_id: UserId,
        staff_name: String,
        assigned_by: UserId,
    },

    /// Reply to the customer who opened a conversation
    ConversationStarted { conversation: ConversationSummary },

    /// A customer wrote into a conversation nobody is assigned to
    PendingMessage {
        conversation: ConversationSummary,
        message: ChatMessage,
    },

    ConversationStatusChanged {
        conversation_id: ConversationId,
        status: ConversationStatus,
        changed_by: UserId,
    },

    /// Full statistics snapshot for staff dashboards
    StatsSnapshot { stats: StatsSnapshot },

    /// A command from this connection was rejected
    Error { code: String, message: String },

    Pong,
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage { .. } => "receiveMessage",
            ServerEvent::StaffAssigned { .. } => "staffAssigned",
            ServerEvent::ConversationStarted { .. } => "conversationStarted",
            ServerEvent::PendingMessage { .. } => "pendingMessage",
            ServerEvent::ConversationStatusChanged { .. } => "conversationStatusChanged",
            ServerEvent::StatsSnapshot { .. } => "statsSnapshot",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
        }
    }
}

/// A persisted chat message as seen by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub customer_id: UserId,
    pub assigned_staff_id: Option<UserId>,
    pub status: ConversationStatus,
    pub priority: Priority,
    pub subject: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate counters pushed to staff. Always a full snapshot, never a delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Customer messages still waiting for a staff reply
    pub pending_messages: u64,
    pub unresolved_reports: u64,
    pub open_conversations: u64,
    pub unassigned_conversations: u64,
    /// Distinct staff principals with a live chat connection
    pub online_staff: u64,
    pub generated_at: DateTime<Utc>,
}

/// Error codes carried by [`ServerEvent::Error`].
pub mod error_codes {
    pub const BAD_FRAME: &str = "bad_frame";
    pub const INVALID: &str = "invalid";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const CLOSED: &str = "conversation_closed";
    pub const CONFLICT: &str = "conflict";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const INTERNAL: &str = "internal";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_command_wire_format() {
        let id = ConversationId::new();
        let raw = format!(
            r#"{{"type":"sendMessage","conversationId":"{}","text":"hello"}}"#,
            id.0
        );
        let cmd: ClientCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::SendMessage {
                conversation_id: id,
                text: "hello".into()
            }
        );
    }

    #[test]
    fn test_start_conversation_priority_is_optional() {
        let raw = r#"{"type":"startConversation","subject":"Late return","text":"hi"}"#;
        let cmd: ClientCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            ClientCommand::StartConversation { priority, .. } => {
                assert_eq!(priority, Priority::Normal)
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_ping_has_no_fields() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Ping);
    }

    #[test]
    fn test_server_event_is_tagged_camel_case() {
        let event = ServerEvent::StaffAssigned {
            conversation_id: ConversationId::new(),
            staff_id: UserId::new(),
            staff_name: "Ana".into(),
            assigned_by: UserId::new(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "staffAssigned");
        assert!(value.get("staffName").is_some());
        assert_eq!(event.kind(), "staffAssigned");
    }
}
