//! Loopback tests: the client on one end of an in-process duplex pipe,
//! a scripted backend on the other.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, split};

use colloquy_core::backend::{BackendError, ChatBackend, NewMessage, ProviderMessage, ProviderRequest};
use colloquy_core::conversation::Role;
use colloquy_core::provider::Provider;
use colloquy_ipc::IpcBackend;
use colloquy_ipc::codec::{Request, Response};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Run a scripted backend on `stream`: decode each request line, hand it
/// to `handler`, write the response back. Requests are also recorded for
/// wire-shape assertions.
fn serve<F>(stream: DuplexStream, requests: Arc<Mutex<Vec<Request>>>, mut handler: F)
where
    F: FnMut(&Request) -> Response + Send + 'static,
{
    tokio::spawn(async move {
        let (reader, mut writer) = split(stream);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Request = serde_json::from_str(&line).unwrap();
            let response = handler(&request);
            requests.lock().unwrap().push(request);
            let mut frame = serde_json::to_string(&response).unwrap();
            frame.push('\n');
            if writer.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
        }
    });
}

fn connect<F>(handler: F) -> (IpcBackend, Arc<Mutex<Vec<Request>>>)
where
    F: FnMut(&Request) -> Response + Send + 'static,
{
    init_tracing();
    let (client_side, server_side) = tokio::io::duplex(4096);
    let requests = Arc::new(Mutex::new(Vec::new()));
    serve(server_side, Arc::clone(&requests), handler);
    let (reader, writer) = split(client_side);
    (IpcBackend::from_streams(reader, writer), requests)
}

fn ok(id: u64, result: Value) -> Response {
    Response {
        id,
        result: Some(result),
        error: None,
    }
}

#[tokio::test]
async fn create_chat_round_trips_the_typed_record() {
    let (backend, requests) = connect(|request| {
        ok(
            request.id,
            json!({
                "id": 1,
                "uuid": "3b2c1f52-8f4e-4b43-9a3c-2f4f6a1f0d9e",
                "title": "Chat 1",
                "created_at": 1_700_000_000,
            }),
        )
    });

    let record = backend.create_chat("Chat 1").await.unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.title, "Chat 1");

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "create_chat");
    assert_eq!(requests[0].params, json!({ "title": "Chat 1" }));
}

#[tokio::test]
async fn backend_error_payload_becomes_rejected() {
    let (backend, _requests) = connect(|request| Response {
        id: request.id,
        result: None,
        error: Some("no such chat".to_string()),
    });

    let err = backend.delete_chat(42).await.unwrap_err();
    match err {
        BackendError::Rejected(message) => assert_eq!(message, "no such chat"),
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn create_message_uses_camel_case_params() {
    let (backend, requests) = connect(|request| ok(request.id, Value::Null));

    backend
        .create_message(
            3,
            NewMessage {
                sender_id: Some("user-1".to_string()),
                provider: "ChatGPT".to_string(),
                role: Role::User,
                content: "hello".to_string(),
            },
        )
        .await
        .unwrap();

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].method, "create_message");
    assert_eq!(
        requests[0].params,
        json!({
            "chatId": 3,
            "senderId": "user-1",
            "provider": "ChatGPT",
            "role": "user",
            "content": "hello",
        })
    );
}

#[tokio::test]
async fn provider_invocation_dispatches_on_the_provider_command() {
    let (backend, requests) = connect(|request| {
        ok(
            request.id,
            json!({ "provider": "Claude", "content": "hi there" }),
        )
    });

    let response = backend
        .invoke_provider(
            Provider::Claude,
            ProviderRequest {
                api_key: "sk-test".to_string(),
                messages: vec![ProviderMessage {
                    role: Role::User,
                    content: "hi".to_string(),
                }],
                model: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(response.content, "hi there");
    assert_eq!(response.error, None);

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].method, "call_claude_api");
    assert_eq!(requests[0].params["apiKey"], "sk-test");
    assert_eq!(requests[0].params["model"], Value::Null);
    assert_eq!(
        requests[0].params["messages"],
        json!([{ "role": "user", "content": "hi" }])
    );
}

#[tokio::test]
async fn responses_are_correlated_by_id_not_arrival_order() {
    init_tracing();
    // Hold both requests, then answer them in reverse.
    let (client_side, server_side) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        let (reader, mut writer) = split(server_side);
        let mut lines = BufReader::new(reader).lines();
        let mut held: Vec<Request> = Vec::new();
        while held.len() < 2 {
            let line = lines.next_line().await.unwrap().unwrap();
            held.push(serde_json::from_str(&line).unwrap());
        }
        held.reverse();
        for request in held {
            let title = request.params["title"].as_str().unwrap();
            let response = ok(
                request.id,
                json!({
                    "id": request.id,
                    "uuid": "00000000-0000-0000-0000-000000000000",
                    "title": title,
                    "created_at": 0,
                }),
            );
            let mut frame = serde_json::to_string(&response).unwrap();
            frame.push('\n');
            writer.write_all(frame.as_bytes()).await.unwrap();
        }
    });

    let (reader, writer) = split(client_side);
    let backend = Arc::new(IpcBackend::from_streams(reader, writer));

    let first = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move { backend.create_chat("first").await })
    };
    let second = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move { backend.create_chat("second").await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.title, "first");
    assert_eq!(second.title, "second");
}

#[tokio::test]
async fn closed_stream_fails_pending_and_later_calls() {
    init_tracing();
    let (client_side, server_side) = tokio::io::duplex(4096);
    drop(server_side);

    let (reader, writer) = split(client_side);
    let backend = IpcBackend::from_streams(reader, writer);

    let err = backend.list_chats().await.unwrap_err();
    assert!(matches!(
        err,
        BackendError::ChannelClosed | BackendError::Transport(_)
    ));
}

#[tokio::test]
async fn undecodable_frames_are_skipped() {
    init_tracing();
    let (client_side, server_side) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        let (reader, mut writer) = split(server_side);
        let mut lines = BufReader::new(reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let request: Request = serde_json::from_str(&line).unwrap();
        writer.write_all(b"not json\n").await.unwrap();
        let response = ok(request.id, json!([]));
        let mut frame = serde_json::to_string(&response).unwrap();
        frame.push('\n');
        writer.write_all(frame.as_bytes()).await.unwrap();
    });

    let (reader, writer) = split(client_side);
    let backend = IpcBackend::from_streams(reader, writer);
    let chats = backend.list_chats().await.unwrap();
    assert!(chats.is_empty());
}
