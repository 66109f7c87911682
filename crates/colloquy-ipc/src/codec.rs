//! Wire frames: one JSON object per line in each direction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One outbound backend invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Reply to the [`Request`] with the matching `id`. Exactly one of
/// `result` / `error` is populated by a well-behaved backend; an error
/// wins if both appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

pub fn encode_request(request: &Request) -> serde_json::Result<String> {
    serde_json::to_string(request)
}

pub fn decode_response(line: &str) -> serde_json::Result<Response> {
    serde_json::from_str(line)
}
