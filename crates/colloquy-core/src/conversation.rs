//! Client-side conversation model.
//!
//! These are the types the registry publishes to consumers. They are
//! deliberately smaller than the backend's wire records: a rendered
//! message needs a role, its text, and the provider label that produced
//! it, nothing more.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Identifier a chat carries on both sides of the backend boundary.
pub type ChatId = i64;

/// Role in the conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Backend rows may carry roles this client never writes (e.g.
    /// `"system"`); anything unrecognized renders as a user message.
    pub fn from_wire(value: &str) -> Role {
        match value {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// A chat as the client knows it. Created only from a successful backend
/// create call, destroyed only by a successful backend delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub uuid: String,
    pub name: Option<String>,
}

/// A single transcript entry. Never mutated after creation; message lists
/// are only appended to or replaced wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub role: Role,
    pub content: String,
    /// Display label of the model that produced this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Set on synthetic assistant messages standing in for a failure.
    #[serde(default)]
    pub is_error: bool,
}
