//! Request/response client over a line-delimited JSON stream.
//!
//! Two background tasks own the transport: a writer task draining an
//! outbound channel, and a reader task routing each decoded [`Response`]
//! to the pending call with the matching id. Dropping the backend closes
//! the outbound channel, which ends the writer task; a spawned child
//! process is killed when the handle is dropped.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use colloquy_core::backend::{
    BackendResult, ChatBackend, ChatRecord, MessageRecord, NewMessage, ProviderRequest,
    ProviderResponse,
};
use colloquy_core::conversation::ChatId;
use colloquy_core::provider::Provider;

use crate::codec::{self, Request, Response};
use crate::error::{IpcError, IpcResult};

#[derive(Default)]
struct Pending {
    /// Set once either transport task exits; calls fail fast after that.
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Response>>,
}

type PendingMap = Arc<Mutex<Pending>>;

fn close(pending: &PendingMap) {
    let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
    pending.closed = true;
    // Dropping the senders wakes every in-flight caller with an error.
    pending.waiters.clear();
}

/// `ChatBackend` implementation that talks to the backend process over
/// a pair of byte streams, one JSON frame per line.
pub struct IpcBackend {
    next_id: AtomicU64,
    pending: PendingMap,
    outbound: mpsc::Sender<String>,
    _child: Option<Child>,
}

impl IpcBackend {
    /// Spawn the backend executable and connect over its stdio. The
    /// child is killed when this handle is dropped.
    pub fn spawn(mut command: Command) -> IpcResult<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(IpcError::Spawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or(IpcError::Closed)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(IpcError::Closed)?;
        let mut backend = Self::from_streams(stdout, stdin);
        backend._child = Some(child);
        Ok(backend)
    }

    /// Connect over an arbitrary stream pair. Tests use
    /// `tokio::io::duplex` here; production goes through [`spawn`].
    ///
    /// [`spawn`]: IpcBackend::spawn
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(Pending::default()));
        let (outbound, outbound_rx) = mpsc::channel::<String>(64);

        tokio::spawn(write_loop(writer, outbound_rx, Arc::clone(&pending)));
        tokio::spawn(read_loop(reader, Arc::clone(&pending)));

        Self {
            next_id: AtomicU64::new(1),
            pending,
            outbound,
            _child: None,
        }
    }

    async fn call(&self, method: &str, params: Value) -> IpcResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = codec::encode_request(&Request {
            id,
            method: method.to_string(),
            params,
        })?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.closed {
                return Err(IpcError::Closed);
            }
            pending.waiters.insert(id, tx);
        }

        if self.outbound.send(line).await.is_err() {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .waiters
                .remove(&id);
            return Err(IpcError::Closed);
        }

        // The reader task drops the sender when the stream ends, which
        // surfaces here as a recv error.
        let response = rx.await.map_err(|_| IpcError::Closed)?;
        if let Some(message) = response.error {
            return Err(IpcError::Rejected(message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> IpcResult<T> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn call_unit(&self, method: &str, params: Value) -> IpcResult<()> {
        self.call(method, params).await?;
        Ok(())
    }
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::Receiver<String>, pending: PendingMap)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = outbound.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!("backend write failed: {e}");
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!("backend write failed: {e}");
            break;
        }
    }
    close(&pending);
    debug!("backend writer task exiting");
}

async fn read_loop<R>(reader: R, pending: PendingMap)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let response = match codec::decode_response(&line) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("dropping undecodable backend frame: {e}");
                        continue;
                    }
                };
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .waiters
                    .remove(&response.id);
                match waiter {
                    Some(tx) => {
                        // Send fails only if the caller gave up waiting.
                        let _ = tx.send(response);
                    }
                    None => debug!(id = response.id, "response for unknown request id"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("backend read failed: {e}");
                break;
            }
        }
    }
    close(&pending);
    debug!("backend reader task exiting");
}

#[async_trait]
impl ChatBackend for IpcBackend {
    async fn create_chat(&self, title: &str) -> BackendResult<ChatRecord> {
        Ok(self
            .call_as("create_chat", json!({ "title": title }))
            .await?)
    }

    async fn delete_chat(&self, chat_id: ChatId) -> BackendResult<()> {
        Ok(self
            .call_unit("delete_chat", json!({ "chatId": chat_id }))
            .await?)
    }

    async fn clear_chat(&self, chat_id: ChatId) -> BackendResult<()> {
        Ok(self
            .call_unit("clear_chat", json!({ "chatId": chat_id }))
            .await?)
    }

    async fn list_chats(&self) -> BackendResult<Vec<ChatRecord>> {
        Ok(self
            .call_as("list_chats", json!({}))
            .await?)
    }

    async fn create_message(&self, chat_id: ChatId, message: NewMessage) -> BackendResult<()> {
        Ok(self
            .call_unit(
                "create_message",
                json!({
                    "chatId": chat_id,
                    "senderId": message.sender_id,
                    "provider": message.provider,
                    "role": message.role,
                    "content": message.content,
                }),
            )
            .await?)
    }

    async fn list_messages(&self, chat_id: ChatId) -> BackendResult<Vec<MessageRecord>> {
        Ok(self
            .call_as("list_messages", json!({ "chatId": chat_id }))
            .await?)
    }

    async fn invoke_provider(
        &self,
        provider: Provider,
        request: ProviderRequest,
    ) -> BackendResult<ProviderResponse> {
        Ok(self
            .call_as(
                provider.command(),
                json!({
                    "apiKey": request.api_key,
                    "messages": request.messages,
                    "model": request.model,
                }),
            )
            .await?)
    }
}
