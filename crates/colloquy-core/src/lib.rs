//! Client-side chat session synchronization for Colloquy.
//!
//! The crate owns the client's view of which chats exist, which messages
//! belong to them, and the in-flight status of each chat, and keeps that
//! view consistent with the local backend process across create, delete,
//! list, and send operations. UI layers read [`registry::RegistryState`]
//! snapshots and drive [`engine::ChatEngine`] actions; nothing else
//! mutates the registry.

pub mod backend;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod provider;
pub mod registry;
pub mod settings;
pub mod test_utils;
