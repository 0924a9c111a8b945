use crate::types::{CitationMap, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to conversations before their first user message
pub const NEW_CHAT_TITLE: &str = "New Chat";

/// Placeholder content shown while a reply is streaming
pub const THINKING_PLACEHOLDER: &str = "Thinking...";

/// A message inside a stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Scoped id (`msg_...`)
    pub id: String,
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
    /// Web citations attached to an assistant reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<CitationMap>,
    /// Id of an image in the image store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// MIME type of the attached image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_mime: Option<String>,
    /// Original file name of the attached image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
}

/// A reference to an image already in the image store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Image store id
    pub id: String,
    /// MIME type
    pub mime: String,
    /// Original file name
    pub name: Option<String>,
}

/// A stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Scoped id (`conv_...`), or `scheduled-<ms>` for the scheduled prompt
    pub id: String,
    /// Display title
    pub title: String,
    /// Messages, oldest first
    pub messages: Vec<StoredMessage>,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// When the conversation last changed
    pub updated_at: DateTime<Utc>,
    /// Model the conversation was started with
    pub model: String,
    /// Conversation owned by the scheduled prompt
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_scheduled: bool,
}

impl Conversation {
    /// Create an empty conversation stamped with the current time
    pub fn new(id: impl Into<String>, title: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            model: model.into(),
            is_scheduled: false,
        }
    }

    /// Ids of all images referenced by this conversation
    pub fn image_ids(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter_map(|m| m.image_id.clone())
            .collect()
    }
}

/// Metadata for listing conversations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id
    pub id: String,
    /// Display title
    pub title: String,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// When the conversation last changed
    pub updated_at: DateTime<Utc>,
    /// Model the conversation was started with
    pub model: String,
    /// Number of messages
    pub message_count: usize,
    /// Conversation owned by the scheduled prompt
    pub is_scheduled: bool,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            model: conversation.model.clone(),
            message_count: conversation.messages.len(),
            is_scheduled: conversation.is_scheduled,
        }
    }
}

/// A binary image in the image store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Scoped id (`img_...`)
    pub id: String,
    /// MIME type
    pub mime: String,
    /// When the image was stored
    pub created_at: DateTime<Utc>,
    /// Raw image bytes
    pub data: Vec<u8>,
}

/// UI color theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Light theme
    #[default]
    Light,
    /// Dark theme
    Dark,
}

impl std::str::FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("Invalid theme: {} (expected light or dark)", other)),
        }
    }
}
