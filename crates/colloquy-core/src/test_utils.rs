//! Test utilities for colloquy-core.
//!
//! In-memory stand-ins for the backend process and the credential store,
//! accessible across crate boundaries so downstream crates can exercise
//! the engine without a real backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::backend::{
    BackendError, BackendResult, ChatBackend, ChatRecord, MessageRecord, NewMessage,
    ProviderRequest, ProviderResponse,
};
use crate::conversation::ChatId;
use crate::provider::Provider;
use crate::settings::CredentialProvider;

#[derive(Debug, Default)]
struct BackendState {
    next_chat_id: i64,
    next_message_id: i64,
    chats: Vec<ChatRecord>,
    messages: HashMap<ChatId, Vec<MessageRecord>>,
    fail_create_chat: bool,
    fail_delete_chat: bool,
    fail_clear_chat: bool,
    fail_list_chats: bool,
    fail_create_message: bool,
    fail_list_messages: Vec<ChatId>,
    fail_invoke_provider: bool,
    provider_replies: VecDeque<ProviderResponse>,
    provider_calls: Vec<(Provider, ProviderRequest)>,
    list_message_calls: Vec<ChatId>,
    created_messages: Vec<(ChatId, NewMessage)>,
}

/// In-memory backend with sequential ids, per-operation failure
/// injection, scripted provider replies, and call recording.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    provider_gate: Mutex<Option<Arc<Semaphore>>>,
    list_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a chat directly, bypassing the facade. Returns the record
    /// so tests can refresh against known ids.
    pub fn seed_chat(&self, title: &str) -> ChatRecord {
        let mut state = self.lock();
        state.next_chat_id += 1;
        let record = ChatRecord {
            id: state.next_chat_id,
            uuid: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: state.next_chat_id,
        };
        state.chats.push(record.clone());
        record
    }

    /// Drop a chat directly, as if another client deleted it.
    pub fn delete_chat_direct(&self, chat_id: ChatId) {
        let mut state = self.lock();
        state.chats.retain(|chat| chat.id != chat_id);
        state.messages.remove(&chat_id);
    }

    /// Insert a message row directly for a seeded chat.
    pub fn seed_message(&self, chat_id: ChatId, role: &str, content: &str) -> MessageRecord {
        let mut state = self.lock();
        state.next_message_id += 1;
        let record = MessageRecord {
            id: state.next_message_id,
            uuid: Uuid::new_v4().to_string(),
            chat_id,
            sender_id: None,
            provider: "ChatGPT".to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: state.next_message_id,
        };
        state.messages.entry(chat_id).or_default().push(record.clone());
        record
    }

    /// Queue the next provider reply. Replies are consumed in order; with
    /// the queue empty a canned reply is produced.
    pub fn push_provider_reply(&self, provider: Provider, content: &str) {
        self.lock().provider_replies.push_back(ProviderResponse {
            provider: provider.display_name().to_string(),
            content: content.to_string(),
            error: None,
        });
    }

    /// Queue a reply whose `error` field is set, as the backend produces
    /// when the provider call went through but the provider complained.
    pub fn push_provider_error(&self, provider: Provider, detail: &str) {
        self.lock().provider_replies.push_back(ProviderResponse {
            provider: provider.display_name().to_string(),
            content: String::new(),
            error: Some(detail.to_string()),
        });
    }

    /// Hold provider calls until permits are added to the returned
    /// semaphore, letting tests overlap sends deterministically.
    pub fn gate_provider_calls(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self
            .provider_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&gate));
        gate
    }

    /// Hold `list_messages` calls until permits are added to the
    /// returned semaphore, letting tests park a refresh mid-fetch.
    pub fn gate_list_messages(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self
            .list_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&gate));
        gate
    }

    pub fn set_fail_create_chat(&self, fail: bool) {
        self.lock().fail_create_chat = fail;
    }

    pub fn set_fail_delete_chat(&self, fail: bool) {
        self.lock().fail_delete_chat = fail;
    }

    pub fn set_fail_clear_chat(&self, fail: bool) {
        self.lock().fail_clear_chat = fail;
    }

    pub fn set_fail_list_chats(&self, fail: bool) {
        self.lock().fail_list_chats = fail;
    }

    pub fn set_fail_create_message(&self, fail: bool) {
        self.lock().fail_create_message = fail;
    }

    pub fn set_fail_list_messages_for(&self, chat_id: ChatId) {
        self.lock().fail_list_messages.push(chat_id);
    }

    pub fn set_fail_invoke_provider(&self, fail: bool) {
        self.lock().fail_invoke_provider = fail;
    }

    pub fn provider_calls(&self) -> Vec<(Provider, ProviderRequest)> {
        self.lock().provider_calls.clone()
    }

    /// Chats whose messages were requested, in call order. Recorded
    /// before any gate, so a parked call is already visible here.
    pub fn list_message_calls(&self) -> Vec<ChatId> {
        self.lock().list_message_calls.clone()
    }

    pub fn created_messages(&self) -> Vec<(ChatId, NewMessage)> {
        self.lock().created_messages.clone()
    }

    pub fn chats(&self) -> Vec<ChatRecord> {
        self.lock().chats.clone()
    }

    pub fn messages(&self, chat_id: ChatId) -> Vec<MessageRecord> {
        self.lock().messages.get(&chat_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for InMemoryBackend {
    async fn create_chat(&self, title: &str) -> BackendResult<ChatRecord> {
        let mut state = self.lock();
        if state.fail_create_chat {
            return Err(BackendError::Rejected("database is locked".to_string()));
        }
        state.next_chat_id += 1;
        let record = ChatRecord {
            id: state.next_chat_id,
            uuid: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: state.next_chat_id,
        };
        state.chats.push(record.clone());
        Ok(record)
    }

    async fn delete_chat(&self, chat_id: ChatId) -> BackendResult<()> {
        let mut state = self.lock();
        if state.fail_delete_chat {
            return Err(BackendError::Rejected("database is locked".to_string()));
        }
        state.chats.retain(|chat| chat.id != chat_id);
        state.messages.remove(&chat_id);
        Ok(())
    }

    async fn clear_chat(&self, chat_id: ChatId) -> BackendResult<()> {
        let mut state = self.lock();
        if state.fail_clear_chat {
            return Err(BackendError::Rejected("database is locked".to_string()));
        }
        state.messages.remove(&chat_id);
        Ok(())
    }

    async fn list_chats(&self) -> BackendResult<Vec<ChatRecord>> {
        let state = self.lock();
        if state.fail_list_chats {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        Ok(state.chats.clone())
    }

    async fn create_message(&self, chat_id: ChatId, message: NewMessage) -> BackendResult<()> {
        let mut state = self.lock();
        if state.fail_create_message {
            return Err(BackendError::Rejected("database is locked".to_string()));
        }
        state.next_message_id += 1;
        let record = MessageRecord {
            id: state.next_message_id,
            uuid: Uuid::new_v4().to_string(),
            chat_id,
            sender_id: message.sender_id.clone(),
            provider: message.provider.clone(),
            role: message.role.to_string(),
            content: message.content.clone(),
            created_at: state.next_message_id,
        };
        state.messages.entry(chat_id).or_default().push(record);
        state.created_messages.push((chat_id, message));
        Ok(())
    }

    async fn list_messages(&self, chat_id: ChatId) -> BackendResult<Vec<MessageRecord>> {
        self.lock().list_message_calls.push(chat_id);
        let gate = self
            .list_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(BackendError::ChannelClosed),
            }
        }

        let state = self.lock();
        if state.fail_list_messages.contains(&chat_id) {
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        Ok(state.messages.get(&chat_id).cloned().unwrap_or_default())
    }

    async fn invoke_provider(
        &self,
        provider: Provider,
        request: ProviderRequest,
    ) -> BackendResult<ProviderResponse> {
        let gate = self
            .provider_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(BackendError::ChannelClosed),
            }
        }

        let mut state = self.lock();
        if state.fail_invoke_provider {
            state.provider_calls.push((provider, request));
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        let reply = state.provider_replies.pop_front().unwrap_or_else(|| {
            ProviderResponse {
                provider: provider.display_name().to_string(),
                content: format!("reply {}", state.provider_calls.len() + 1),
                error: None,
            }
        });
        state.provider_calls.push((provider, request));
        Ok(reply)
    }
}

/// Fixed credential map for tests.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    tokens: HashMap<Provider, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials for every provider, for tests that do not care which
    /// one is selected.
    pub fn all(token: &str) -> Self {
        let mut credentials = Self::new();
        for provider in Provider::ALL {
            credentials.tokens.insert(provider, token.to_string());
        }
        credentials
    }

    #[must_use]
    pub fn with(mut self, provider: Provider, token: &str) -> Self {
        self.tokens.insert(provider, token.to_string());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn token_for(&self, provider: Provider) -> Option<String> {
        self.tokens.get(&provider).cloned()
    }
}
