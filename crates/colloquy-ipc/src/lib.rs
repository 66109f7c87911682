//! Line-delimited JSON IPC facade to the Colloquy backend process.
//!
//! [`client::IpcBackend`] implements `colloquy_core::backend::ChatBackend`
//! as typed wrappers over a request/response byte stream: one JSON frame
//! per line, requests correlated to responses by id. Marshaling only; no
//! retries, no error shaping beyond `BackendError`.

pub mod client;
pub mod codec;
pub mod error;

pub use client::IpcBackend;
pub use error::{IpcError, IpcResult};
