//! Remote Backend Facade: the typed asynchronous boundary to the local
//! backend process.
//!
//! One method per backend operation, each a single request/response with
//! no partial results. Implementations marshal and nothing else: no
//! retries, no error transformation beyond [`BackendError`]. Every call
//! can fail and the failure is propagated to the caller verbatim.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::{ChatId, Role};
use crate::provider::Provider;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The transport to the backend process failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend handled the call and returned an application error.
    #[error("{0}")]
    Rejected(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backend connection closed")]
    ChannelClosed,
}

/// Chat row as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: ChatId,
    pub uuid: String,
    pub title: String,
    pub created_at: i64,
}

/// Message row as stored by the backend. `role` stays a raw string here;
/// the client maps it leniently via [`Role::from_wire`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub uuid: String,
    pub chat_id: ChatId,
    pub sender_id: Option<String>,
    pub provider: String,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

/// Payload for persisting a message the client already shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: Option<String>,
    pub provider: String,
    pub role: Role,
    pub content: String,
}

/// One turn of the transcript as sent to a provider: role and content
/// only, client ids and display labels stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub api_key: String,
    pub messages: Vec<ProviderMessage>,
    /// `None` lets the backend pick the provider's default model.
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider: String,
    pub content: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// The seven backend operations the synchronization engine is built on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn create_chat(&self, title: &str) -> BackendResult<ChatRecord>;

    async fn delete_chat(&self, chat_id: ChatId) -> BackendResult<()>;

    /// Delete all messages from a chat, keeping the chat itself.
    async fn clear_chat(&self, chat_id: ChatId) -> BackendResult<()>;

    /// Authoritative chat list, without messages.
    async fn list_chats(&self) -> BackendResult<Vec<ChatRecord>>;

    async fn create_message(&self, chat_id: ChatId, message: NewMessage) -> BackendResult<()>;

    async fn list_messages(&self, chat_id: ChatId) -> BackendResult<Vec<MessageRecord>>;

    /// Run the transcript through the given provider's model.
    async fn invoke_provider(
        &self,
        provider: Provider,
        request: ProviderRequest,
    ) -> BackendResult<ProviderResponse>;
}
