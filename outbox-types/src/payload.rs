//! Message payloads carried by the outbox.
//!
//! The outbox does not interpret payloads beyond rejecting empty ones; the
//! remote service does. Each kind the chat client produces is a variant of
//! [`MessagePayload`].

use serde::{Deserialize, Serialize};

/// All message kinds the outbox can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    /// A chat message typed by the user
    ChatMessage(ChatMessage),
    /// A control command for the assistant (e.g. "schedule", "cancel")
    ControlCommand(ControlCommand),
}

impl MessagePayload {
    /// Build a chat payload stamped with the given client timestamp.
    pub fn chat(content: impl Into<String>, client_timestamp: i64) -> Self {
        Self::ChatMessage(ChatMessage {
            content: content.into(),
            client_timestamp,
            conversation_id: None,
        })
    }

    /// Build a control command payload with no arguments.
    pub fn command(command: impl Into<String>, client_timestamp: i64) -> Self {
        Self::ControlCommand(ControlCommand {
            command: command.into(),
            arguments: Vec::new(),
            client_timestamp,
        })
    }

    /// True if the payload carries nothing deliverable.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::ChatMessage(m) => m.content.trim().is_empty(),
            Self::ControlCommand(c) => c.command.trim().is_empty(),
        }
    }

    /// Short name of the variant, as written on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage(_) => "chat_message",
            Self::ControlCommand(_) => "control_command",
        }
    }

    /// Timestamp the client attached when the user produced the message.
    pub fn client_timestamp(&self) -> i64 {
        match self {
            Self::ChatMessage(m) => m.client_timestamp,
            Self::ControlCommand(c) => c.client_timestamp,
        }
    }
}

/// A chat message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Text the user typed
    pub content: String,
    /// Client clock at creation (Unix millis)
    pub client_timestamp: i64,
    /// Conversation the message belongs to, if the client tracks one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// A control command for the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    /// Command name
    pub command: String,
    /// Positional arguments
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Client clock at creation (Unix millis)
    pub client_timestamp: i64,
}
