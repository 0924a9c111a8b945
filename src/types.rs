//! Shared data types
//!
//! Messages, citations and model metadata exchanged between the proxy,
//! the streaming client, the renderer and local storage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Role of a chat message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user
    User,
    /// Model reply
    Assistant,
    /// System instructions
    System,
}

impl Role {
    /// All roles accepted by the chat endpoint, in wire form
    pub const ALLOWED: [&'static str; 3] = ["user", "assistant", "system"];

    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("Invalid message role: {}", other)),
        }
    }
}

/// Web search mode forwarded to the upstream provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSearchMode {
    /// Provider decides per message
    #[default]
    Auto,
    /// Always search
    On,
    /// Never search
    Off,
}

impl WebSearchMode {
    /// All modes accepted by the chat endpoint, in wire form
    pub const ALLOWED: [&'static str; 3] = ["auto", "on", "off"];

    /// Wire name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            WebSearchMode::Auto => "auto",
            WebSearchMode::On => "on",
            WebSearchMode::Off => "off",
        }
    }
}

impl FromStr for WebSearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(WebSearchMode::Auto),
            "on" => Ok(WebSearchMode::On),
            "off" => Ok(WebSearchMode::Off),
            other => Err(format!("Invalid web search mode: {}", other)),
        }
    }
}

/// A source reference attached to an assistant reply
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Citation {
    /// Index of the citation in the provider's list, as a string
    pub id: String,
    /// Source URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Source title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Short excerpt from the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Raw provider metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Citations keyed by their zero-based index ("0", "1", ...)
pub type CitationMap = BTreeMap<String, Citation>;

/// Capability flags reported by the upstream model catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapabilities {
    /// Model can ground answers in web search
    #[serde(default)]
    pub supports_web_search: bool,
    /// Model supports tool/function calling
    #[serde(default)]
    pub supports_function_calling: bool,
    /// Model accepts image input
    #[serde(default)]
    pub supports_vision: bool,
    /// Model exposes reasoning output
    #[serde(default)]
    pub supports_reasoning: bool,
}

/// A text model rejected by the pricing filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedModel {
    /// Model identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// USD per 1M input tokens
    pub input_price: f64,
    /// USD per 1M output tokens
    pub output_price: f64,
    /// Why the model was blocked
    pub reason: String,
}

/// A role and text pair as exchanged with the chat endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
