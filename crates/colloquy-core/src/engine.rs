//! Synchronization actions: the only component that mutates the Chat
//! Registry.
//!
//! Every action calls the backend facade, then applies one atomic
//! registry update per completed step. Backend failures on user-initiated
//! mutations land in the registry's single error slot; failures of
//! fire-and-forget persistence calls are logged and swallowed, and the
//! optimistic state they backed is never rolled back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::backend::{ChatBackend, MessageRecord, NewMessage, ProviderMessage, ProviderRequest};
use crate::conversation::{Chat, ChatId, ChatMessage, Role};
use crate::provider::Provider;
use crate::registry::{ChatRegistry, RegistryState};
use crate::settings::CredentialProvider;

/// Context object owning the registry and driving all state transitions.
///
/// Constructed once at application start and shared (behind an `Arc`)
/// with whatever composes the consumers. Loading is tracked per chat, so
/// the user can switch chats and keep interacting while another chat's
/// provider request is outstanding.
pub struct ChatEngine {
    registry: ChatRegistry,
    backend: Arc<dyn ChatBackend>,
    credentials: Arc<dyn CredentialProvider>,
    /// Client-generated message ids: stable, unique, monotonic within
    /// the process.
    next_message_id: AtomicI64,
    /// Per-chat send generation. A completion whose generation is no
    /// longer current lost the race to a newer send and is dropped.
    send_generation: Mutex<HashMap<ChatId, u64>>,
}

impl ChatEngine {
    pub fn new(backend: Arc<dyn ChatBackend>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            registry: ChatRegistry::new(),
            backend,
            credentials,
            next_message_id: AtomicI64::new(1),
            send_generation: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ChatRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> Arc<RegistryState> {
        self.registry.snapshot()
    }

    pub fn set_prompt(&self, text: impl Into<String>) {
        let text = text.into();
        self.registry.update(|state| state.prompt = text);
    }

    pub fn select_provider(&self, provider: Provider) {
        self.registry
            .update(|state| state.selected_provider = provider);
    }

    pub fn select_model(&self, model: impl Into<String>) {
        let model = model.into();
        self.registry.update(|state| state.selected_model = model);
    }

    /// Dismiss the error modal; clears the single error slot.
    pub fn dismiss_error(&self) {
        self.registry.update(|state| state.error = None);
    }

    /// Pure local selection change; no backend call. Selecting a chat the
    /// registry does not know is a logged no-op.
    pub fn select_chat(&self, chat_id: ChatId) {
        self.registry.update(|state| {
            if !state.chats.contains_key(&chat_id) {
                warn!(chat_id, "ignoring selection of unknown chat");
                return;
            }
            state.selected_chat_id = Some(chat_id);
            state.prompt.clear();
            state.error = None;
        });
    }

    /// Create a chat titled `Chat {n}` where `n` is one past the highest
    /// chat id the registry holds. On success the new chat lands at the
    /// front of the list and becomes selected.
    pub async fn create_chat(&self) {
        let next_number = {
            let snapshot = self.registry.snapshot();
            snapshot.chats.keys().max().map_or(1, |max| max + 1)
        };
        let title = format!("Chat {next_number}");
        debug!(%title, "creating chat");

        match self.backend.create_chat(&title).await {
            Ok(record) => self.registry.update(|state| {
                state.chats.insert(
                    record.id,
                    Chat {
                        id: record.id,
                        uuid: record.uuid,
                        name: Some(record.title),
                    },
                );
                state.chat_ids.insert(0, record.id);
                state.selected_chat_id = Some(record.id);
                state.prompt.clear();
                state.error = None;
            }),
            Err(e) => {
                warn!(error = %e, "create chat failed");
                self.registry
                    .update(|state| state.error = Some(format!("Failed to create chat: {e}")));
            }
        }
    }

    /// Delete a chat. On success the id disappears from the registry and
    /// selection falls back to the new first chat, if any. On failure the
    /// registry is untouched and the error slot is set.
    pub async fn delete_chat(&self, chat_id: ChatId) {
        if !self.registry.snapshot().chats.contains_key(&chat_id) {
            self.registry.update(|state| {
                state.error = Some(format!("Failed to delete chat: unknown chat {chat_id}"));
            });
            return;
        }

        match self.backend.delete_chat(chat_id).await {
            Ok(()) => self.registry.update(|state| {
                state.chats.remove(&chat_id);
                state.chat_ids.retain(|id| *id != chat_id);
                state.chat_messages.remove(&chat_id);
                state.chat_loading.remove(&chat_id);
                if state.selected_chat_id == Some(chat_id) {
                    state.selected_chat_id = state.chat_ids.first().copied();
                }
                state.prompt.clear();
                state.error = None;
            }),
            Err(e) => {
                warn!(chat_id, error = %e, "delete chat failed");
                self.registry
                    .update(|state| state.error = Some(format!("Failed to delete chat: {e}")));
            }
        }
    }

    /// Full reconciliation with backend truth: replaces the chat list,
    /// per-chat messages, and loading flags wholesale. Message fetches
    /// run concurrently; a chat whose messages cannot be fetched is
    /// treated as empty rather than failing the refresh. Skipped while
    /// any send is in flight, since the full replace would discard that
    /// send's optimistic state; a send that starts while the fetches are
    /// in flight discards the fetched result instead.
    pub async fn refresh_chats(&self) {
        if self.registry.snapshot().any_loading() {
            debug!("refresh skipped: a send is in flight");
            return;
        }

        let records = match self.backend.list_chats().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "list chats failed");
                self.registry
                    .update(|state| state.error = Some(format!("Failed to fetch chats: {e}")));
                return;
            }
        };

        if records.is_empty() {
            self.registry.update(|state| {
                if state.any_loading() {
                    debug!("refresh discarded: a send started mid-refresh");
                    return;
                }
                state.chats.clear();
                state.chat_ids.clear();
                state.chat_messages.clear();
                state.chat_loading.clear();
                state.selected_chat_id = None;
                state.error = None;
            });
            return;
        }

        let fetches = records.iter().map(|record| {
            let backend = Arc::clone(&self.backend);
            let chat_id = record.id;
            async move {
                match backend.list_messages(chat_id).await {
                    Ok(rows) => (chat_id, rows),
                    Err(e) => {
                        warn!(chat_id, error = %e, "failed to load messages; treating chat as empty");
                        (chat_id, Vec::new())
                    }
                }
            }
        });
        let fetched = join_all(fetches).await;

        let chat_ids: Vec<ChatId> = records.iter().map(|record| record.id).collect();
        let chats: HashMap<ChatId, Chat> = records
            .into_iter()
            .map(|record| {
                (
                    record.id,
                    Chat {
                        id: record.id,
                        uuid: record.uuid,
                        name: Some(record.title),
                    },
                )
            })
            .collect();
        let chat_messages: HashMap<ChatId, Vec<ChatMessage>> = fetched
            .into_iter()
            .map(|(chat_id, rows)| {
                (
                    chat_id,
                    rows.into_iter().map(message_from_record).collect(),
                )
            })
            .collect();

        self.registry.update(|state| {
            // Re-checked here, atomically with the replace: a send may
            // have started while the fetches were parked.
            if state.any_loading() {
                debug!("refresh discarded: a send started mid-refresh");
                return;
            }
            state.selected_chat_id = match state.selected_chat_id {
                Some(id) if chats.contains_key(&id) => Some(id),
                _ => chat_ids.first().copied(),
            };
            state.chat_ids = chat_ids;
            state.chats = chats;
            state.chat_messages = chat_messages;
            state.chat_loading.clear();
            state.error = None;
        });
    }

    /// Empty the selected chat's transcript immediately, then tell the
    /// backend. The local view is authoritative: a failed backend clear
    /// is only logged.
    pub fn clear_chat(&self) {
        let Some(chat_id) = self.registry.snapshot().selected_chat_id else {
            return;
        };
        self.registry.update(|state| {
            state.chat_messages.insert(chat_id, Vec::new());
            state.error = None;
        });

        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            if let Err(e) = backend.clear_chat(chat_id).await {
                warn!(chat_id, error = %e, "clear chat persistence failed");
            }
        });
    }

    /// The send protocol: optimistic user append, fire-and-forget
    /// persistence, credential check, awaited provider call, then one
    /// completion update that appends the assistant reply (or a synthetic
    /// error message) and drops the chat's loading flag.
    ///
    /// A no-op when no chat is selected or the prompt is blank. The
    /// transcript sent to the provider is recomputed from current state
    /// at call time, not captured at the optimistic append.
    pub async fn send_message(&self) {
        let (chat_id, content, provider, model) = {
            let snapshot = self.registry.snapshot();
            let Some(chat_id) = snapshot.selected_chat_id else {
                return;
            };
            if snapshot.prompt.trim().is_empty() {
                return;
            }
            (
                chat_id,
                snapshot.prompt.trim_end().to_string(),
                snapshot.selected_provider,
                snapshot.selected_model.clone(),
            )
        };

        let generation = self.bump_generation(chat_id);
        let user_message = ChatMessage {
            id: self.next_message_id(),
            role: Role::User,
            content: content.clone(),
            provider: Some(provider.display_name().to_string()),
            is_error: false,
        };
        self.registry.update(|state| {
            state
                .chat_messages
                .entry(chat_id)
                .or_default()
                .push(user_message);
            state.chat_loading.insert(chat_id, true);
            state.prompt.clear();
            state.error = None;
        });

        self.persist_message(chat_id, Role::User, content, provider);

        let Some(api_key) = self.credentials.token_for(provider) else {
            let text = format!("Missing API key for {provider}");
            warn!(chat_id, %provider, "send aborted: no credential");
            let message = self.synthetic_error_message(provider, text.clone());
            self.complete_send(chat_id, Some(message), Some(text));
            return;
        };

        // Recomputed here so anything appended since the optimistic
        // update is part of the provider context.
        let request = {
            let snapshot = self.registry.snapshot();
            let messages = snapshot
                .messages(chat_id)
                .iter()
                .map(|message| ProviderMessage {
                    role: message.role,
                    content: message.content.clone(),
                })
                .collect();
            ProviderRequest {
                api_key,
                messages,
                model: if model.is_empty() { None } else { Some(model) },
            }
        };

        debug!(chat_id, %provider, "awaiting provider response");
        let result = self.backend.invoke_provider(provider, request).await;

        if self.current_generation(chat_id) != generation {
            debug!(chat_id, generation, "dropping stale provider completion");
            return;
        }

        match result {
            Ok(response) if response.error.is_none() => {
                let assistant = ChatMessage {
                    id: self.next_message_id(),
                    role: Role::Assistant,
                    content: response.content.clone(),
                    provider: Some(provider.display_name().to_string()),
                    is_error: false,
                };
                self.persist_message(chat_id, Role::Assistant, response.content, provider);
                self.complete_send(chat_id, Some(assistant), None);
            }
            Ok(response) => {
                let detail = response.error.unwrap_or_default();
                let text = format!("Error from {provider}: {detail}");
                warn!(chat_id, %provider, %detail, "provider returned an error");
                let message = self.synthetic_error_message(provider, text.clone());
                self.complete_send(chat_id, Some(message), Some(text));
            }
            Err(e) => {
                let text = format!("Error from {provider}: {e}");
                warn!(chat_id, %provider, error = %e, "provider call failed");
                let message = self.synthetic_error_message(provider, text.clone());
                self.complete_send(chat_id, Some(message), Some(text));
            }
        }
    }

    fn next_message_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    fn bump_generation(&self, chat_id: ChatId) -> u64 {
        let mut generations = self
            .send_generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = generations.entry(chat_id).or_insert(0);
        *entry += 1;
        *entry
    }

    fn current_generation(&self, chat_id: ChatId) -> u64 {
        self.send_generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat_id)
            .copied()
            .unwrap_or(0)
    }

    fn synthetic_error_message(&self, provider: Provider, text: String) -> ChatMessage {
        ChatMessage {
            id: self.next_message_id(),
            role: Role::Assistant,
            content: text,
            provider: Some(provider.display_name().to_string()),
            is_error: true,
        }
    }

    /// Final transition of a send: append the outcome message, surface
    /// the error if there is one, and drop the loading flag. A chat
    /// deleted while the provider call was in flight gets no writes at
    /// all, the error slot included.
    fn complete_send(&self, chat_id: ChatId, message: Option<ChatMessage>, error: Option<String>) {
        self.registry.update(|state| {
            if !state.chats.contains_key(&chat_id) {
                return;
            }
            if let Some(message) = message {
                state
                    .chat_messages
                    .entry(chat_id)
                    .or_default()
                    .push(message);
            }
            state.chat_loading.insert(chat_id, false);
            if let Some(text) = error {
                state.error = Some(text);
            }
        });
    }

    /// Fire-and-forget persistence of a message already shown locally.
    /// Failure is logged, never surfaced; the optimistic state stands.
    fn persist_message(&self, chat_id: ChatId, role: Role, content: String, provider: Provider) {
        let backend = Arc::clone(&self.backend);
        let message = NewMessage {
            sender_id: None,
            provider: provider.display_name().to_string(),
            role,
            content,
        };
        tokio::spawn(async move {
            if let Err(e) = backend.create_message(chat_id, message).await {
                warn!(chat_id, error = %e, "message persistence failed");
            }
        });
    }
}

fn message_from_record(record: MessageRecord) -> ChatMessage {
    ChatMessage {
        id: record.id,
        role: Role::from_wire(&record.role),
        content: record.content,
        provider: Some(record.provider),
        is_error: false,
    }
}
