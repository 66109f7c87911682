//! Chat Registry: the single client-side source of truth consumers
//! render from.
//!
//! The registry publishes immutable [`RegistryState`] snapshots behind an
//! `Arc`. Actions replace the whole state (clone, apply, swap) rather
//! than mutating in place, so a snapshot handed to a consumer is never
//! torn by a concurrent update. Only the engine writes; everything else
//! reads.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::conversation::{Chat, ChatId, ChatMessage};
use crate::provider::Provider;

/// Aggregate client state.
///
/// Invariants, holding after every completed action:
/// - `chat_ids` and the key set of `chats` are equal; `chat_ids` carries
///   the display order (newest created first).
/// - `chat_messages` and `chat_loading` never hold entries for chats
///   absent from `chats` (a chat present in `chats` may lazily lack a
///   `chat_messages` entry).
/// - `selected_chat_id`, when set, is a key of `chats`; it is `None`
///   only while `chat_ids` is empty.
/// - `error` is a single slot: a new error overwrites the previous one.
#[derive(Debug, Clone)]
pub struct RegistryState {
    pub chat_ids: Vec<ChatId>,
    pub chats: HashMap<ChatId, Chat>,
    pub chat_messages: HashMap<ChatId, Vec<ChatMessage>>,
    /// True while a send is awaiting a provider response for that chat.
    pub chat_loading: HashMap<ChatId, bool>,
    pub selected_chat_id: Option<ChatId>,
    pub prompt: String,
    pub selected_provider: Provider,
    pub selected_model: String,
    pub error: Option<String>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            chat_ids: Vec::new(),
            chats: HashMap::new(),
            chat_messages: HashMap::new(),
            chat_loading: HashMap::new(),
            selected_chat_id: None,
            prompt: String::new(),
            selected_provider: Provider::ChatGpt,
            selected_model: "o4-mini".to_string(),
            error: None,
        }
    }
}

impl RegistryState {
    /// Messages of a chat in conversation order; empty for chats whose
    /// messages have not been populated yet.
    pub fn messages(&self, chat_id: ChatId) -> &[ChatMessage] {
        self.chat_messages
            .get(&chat_id)
            .map_or(&[], Vec::as_slice)
    }

    pub fn is_loading(&self, chat_id: ChatId) -> bool {
        self.chat_loading.get(&chat_id).copied().unwrap_or(false)
    }

    pub fn any_loading(&self) -> bool {
        self.chat_loading.values().any(|loading| *loading)
    }
}

/// Shared handle around the published state.
#[derive(Debug, Default)]
pub struct ChatRegistry {
    state: RwLock<Arc<RegistryState>>,
}

impl ChatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheap, never-torn view of the current state.
    pub fn snapshot(&self) -> Arc<RegistryState> {
        Arc::clone(
            &self
                .state
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Clone the current state, apply `f`, and publish the result as the
    /// new snapshot. Everything `f` does lands atomically from a
    /// consumer's point of view.
    pub(crate) fn update(&self, f: impl FnOnce(&mut RegistryState)) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }
}
