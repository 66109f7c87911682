//! Provider catalog: the three supported model backends, their IPC
//! command names, display labels, and model tables.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// One of the supported model backends. Each has its own credential and
/// its own model list; the serialized form (`"chatgpt"`, `"claude"`,
/// `"gemini"`) doubles as the credential key in the settings file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    ChatGpt,
    Claude,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::ChatGpt, Provider::Claude, Provider::Gemini];

    /// Human-readable label attached to messages this provider produced.
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::ChatGpt => "ChatGPT",
            Provider::Claude => "Claude",
            Provider::Gemini => "Gemini",
        }
    }

    /// Backend command that invokes this provider.
    pub fn command(self) -> &'static str {
        match self {
            Provider::ChatGpt => "call_chatgpt_api",
            Provider::Claude => "call_claude_api",
            Provider::Gemini => "call_gemini_api",
        }
    }

    /// Models selectable for this provider, newest tiers first.
    pub fn available_models(self) -> &'static [&'static str] {
        match self {
            Provider::ChatGpt => &[
                "chatgpt-4o-latest",
                "gpt-4.1",
                "gpt-4o",
                "gpt-4o-mini",
                "gpt-4.1-mini",
                "gpt-4.1-nano",
                "o4-mini",
                "o3",
                "o3-mini",
                "o1-pro",
                "o1",
                "o1-preview",
                "o1-mini",
            ],
            Provider::Claude => &[
                "claude-opus-4-20250514",
                "claude-sonnet-4-20250514",
                "claude-3-7-sonnet-20250219",
                "claude-3-5-sonnet-20241022",
                "claude-3-5-haiku-20241022",
                "claude-3-5-sonnet-20240620",
                "claude-3-haiku-20240307",
                "claude-3-opus-20240229",
            ],
            Provider::Gemini => &[
                "gemini-2.5-pro",
                "gemini-2.5-flash",
                "gemini-2.0-flash",
                "gemini-2.0-flash-lite",
            ],
        }
    }

    /// Model the backend falls back to when a request names none, or
    /// names one that is not in the catalog.
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::ChatGpt => "gpt-4o-mini",
            Provider::Claude => "claude-3-5-haiku-20241022",
            Provider::Gemini => "gemini-1.5-flash-latest",
        }
    }
}
