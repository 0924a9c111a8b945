//! Conversation history stored under the `conversations` key

use super::keys;
use super::types::{Conversation, ConversationSummary, ImageRef, StoredMessage, NEW_CHAT_TITLE};
use super::{generate_scoped_id, SqliteStorage, THINKING_PLACEHOLDER};
use crate::error::{OpenChatError, Result};
use crate::types::{ChatMessage, CitationMap, Role};
use chrono::Utc;
use std::collections::BTreeMap;

type ConversationMap = BTreeMap<String, Conversation>;

const MAX_TITLE_CHARS: usize = 50;
const TRUNCATED_TITLE_CHARS: usize = 47;

/// Derive a conversation title from its first user message
///
/// # Examples
///
/// ```
/// use openchat::storage::derive_title;
///
/// assert_eq!(derive_title("  hello  ", false), "hello");
/// assert_eq!(derive_title("", true), "Image message");
/// assert_eq!(derive_title(&"x".repeat(60), false).chars().count(), 50);
/// ```
pub fn derive_title(content: &str, has_image: bool) -> String {
    let trimmed = content.trim();
    let title = if !trimmed.is_empty() {
        trimmed
    } else if has_image {
        "Image message"
    } else {
        NEW_CHAT_TITLE
    };

    if title.chars().count() > MAX_TITLE_CHARS {
        let cut: String = title.chars().take(TRUNCATED_TITLE_CHARS).collect();
        format!("{}...", cut)
    } else {
        title.to_string()
    }
}

/// Append pending messages to a history, skipping any that repeat the last entry
pub fn merge_pending(history: &mut Vec<ChatMessage>, pending: &[ChatMessage]) {
    for message in pending {
        if history.last() != Some(message) {
            history.push(message.clone());
        }
    }
}

fn is_sendable(message: &StoredMessage) -> bool {
    let content = message.content.trim();
    !content.is_empty() && content != THINKING_PLACEHOLDER
}

impl SqliteStorage {
    /// All conversations keyed by id
    pub fn conversations(&self) -> Result<ConversationMap> {
        Ok(self.get_value(keys::CONVERSATIONS)?.unwrap_or_default())
    }

    /// Load one conversation
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations()?.remove(id))
    }

    /// Conversation summaries, most recently updated first
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let mut summaries: Vec<ConversationSummary> = self
            .conversations()?
            .values()
            .map(ConversationSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Id of the current conversation
    pub fn current_conversation_id(&self) -> Result<Option<String>> {
        self.get_value(keys::CURRENT_CONVERSATION_ID)
    }

    /// Set or clear the current conversation
    pub fn set_current_conversation_id(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => self.set_value(keys::CURRENT_CONVERSATION_ID, id),
            None => self.remove_value(keys::CURRENT_CONVERSATION_ID),
        }
    }

    /// Make an existing conversation current
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::NotFound` if no conversation has that id.
    pub fn switch_conversation(&self, id: &str) -> Result<()> {
        if self.get_conversation(id)?.is_none() {
            return Err(OpenChatError::NotFound(format!("conversation {}", id)).into());
        }
        self.set_current_conversation_id(Some(id))
    }

    /// Create an empty "New Chat" conversation and make it current
    pub fn create_conversation(&self, model: &str) -> Result<String> {
        let id = generate_scoped_id("conv");
        let conversation = Conversation::new(id.clone(), NEW_CHAT_TITLE, model);
        self.update_value(keys::CONVERSATIONS, |map: &mut ConversationMap| {
            map.insert(id.clone(), conversation);
            Ok(())
        })?;
        self.set_current_conversation_id(Some(&id))?;
        tracing::debug!("Created conversation {}", id);
        Ok(id)
    }

    /// Insert or replace a whole conversation
    pub fn save_conversation(&self, conversation: Conversation) -> Result<()> {
        self.update_value(keys::CONVERSATIONS, |map: &mut ConversationMap| {
            map.insert(conversation.id.clone(), conversation);
            Ok(())
        })
    }

    /// Append a message, creating the conversation if it does not exist
    ///
    /// A user message added to a conversation still titled "New Chat"
    /// retitles it from the message text.
    ///
    /// # Returns
    ///
    /// Returns the new message id.
    pub fn add_message(
        &self,
        conversation_id: &str,
        model: &str,
        role: Role,
        content: &str,
        image: Option<&ImageRef>,
    ) -> Result<String> {
        let message = StoredMessage {
            id: generate_scoped_id("msg"),
            role,
            content: content.to_string(),
            citations: None,
            image_id: image.map(|i| i.id.clone()),
            image_mime: image.map(|i| i.mime.clone()),
            image_name: image.and_then(|i| i.name.clone()),
        };
        let message_id = message.id.clone();
        let title = derive_title(content, image.is_some());

        self.update_value(keys::CONVERSATIONS, |map: &mut ConversationMap| {
            let conversation = map
                .entry(conversation_id.to_string())
                .or_insert_with(|| Conversation::new(conversation_id, title.clone(), model));

            if role == Role::User && conversation.title == NEW_CHAT_TITLE {
                conversation.title = title;
            }
            conversation.messages.push(message);
            conversation.updated_at = Utc::now();
            Ok(())
        })?;

        Ok(message_id)
    }

    /// Replace a message's content and citations
    ///
    /// # Returns
    ///
    /// Returns false when the conversation or message does not exist.
    pub fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
        citations: Option<&CitationMap>,
    ) -> Result<bool> {
        self.update_value(keys::CONVERSATIONS, |map: &mut ConversationMap| {
            let Some(conversation) = map.get_mut(conversation_id) else {
                return Ok(false);
            };
            let Some(message) = conversation
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
            else {
                return Ok(false);
            };

            message.content = content.to_string();
            if let Some(citations) = citations.filter(|c| !c.is_empty()) {
                message.citations = Some(citations.clone());
            }
            conversation.updated_at = Utc::now();
            Ok(true)
        })
    }

    /// Rename a conversation; a blank title becomes "New Chat"
    pub fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        self.update_value(keys::CONVERSATIONS, |map: &mut ConversationMap| {
            let conversation = map
                .get_mut(id)
                .ok_or_else(|| OpenChatError::NotFound(format!("conversation {}", id)))?;
            let trimmed = title.trim();
            conversation.title = if trimmed.is_empty() {
                NEW_CHAT_TITLE.to_string()
            } else {
                trimmed.to_string()
            };
            conversation.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Delete a conversation and the images it references
    ///
    /// When the deleted conversation was current, the most recently updated
    /// remaining conversation becomes current.
    ///
    /// # Returns
    ///
    /// Returns false when no conversation had that id.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        let removed = self.update_value(keys::CONVERSATIONS, |map: &mut ConversationMap| {
            Ok(map.remove(id).map(|c| (c, next_current(map))))
        })?;

        let Some((conversation, next)) = removed else {
            return Ok(false);
        };

        let images = self.delete_images(&conversation.image_ids())?;
        if self.current_conversation_id()?.as_deref() == Some(id) {
            self.set_current_conversation_id(next.as_deref())?;
        }

        tracing::debug!("Deleted conversation {} ({} images)", id, images);
        Ok(true)
    }

    /// Remove every message from a conversation and reset its title
    pub fn clear_conversation(&self, id: &str) -> Result<()> {
        let image_ids = self.update_value(keys::CONVERSATIONS, |map: &mut ConversationMap| {
            let conversation = map
                .get_mut(id)
                .ok_or_else(|| OpenChatError::NotFound(format!("conversation {}", id)))?;
            let image_ids = conversation.image_ids();
            conversation.messages.clear();
            conversation.title = NEW_CHAT_TITLE.to_string();
            conversation.updated_at = Utc::now();
            Ok(image_ids)
        })?;
        self.delete_images(&image_ids)?;
        Ok(())
    }

    /// Drop the last assistant reply so its prompt can be sent again
    ///
    /// # Returns
    ///
    /// Returns the content of the user message just before the removed
    /// reply. Returns `None`, leaving the conversation untouched, when it is
    /// missing, holds no assistant reply, or the reply has no prompt before it.
    pub fn delete_last_assistant_message(
        &self,
        conversation_id: &str,
    ) -> Result<Option<String>> {
        self.update_value(keys::CONVERSATIONS, |map: &mut ConversationMap| {
            let Some(conversation) = map.get_mut(conversation_id) else {
                return Ok(None);
            };
            let Some(index) = conversation
                .messages
                .iter()
                .rposition(|m| m.role == Role::Assistant)
            else {
                return Ok(None);
            };

            let Some(prompt) = conversation.messages[..index]
                .last()
                .filter(|m| m.role == Role::User)
                .map(|m| m.content.clone())
            else {
                return Ok(None);
            };
            conversation.messages.remove(index);
            conversation.updated_at = Utc::now();
            Ok(Some(prompt))
        })
    }

    /// Messages to send with the next chat request
    ///
    /// Drops blank and "Thinking..." placeholder messages, appends `pending`
    /// without repeating the last message, and keeps the last `limit`.
    pub fn messages_for_api(
        &self,
        conversation_id: &str,
        pending: &[ChatMessage],
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let mut history: Vec<ChatMessage> = self
            .get_conversation(conversation_id)?
            .map(|c| {
                c.messages
                    .iter()
                    .filter(|m| is_sendable(m))
                    .map(|m| ChatMessage::new(m.role, m.content.clone()))
                    .collect()
            })
            .unwrap_or_default();

        merge_pending(&mut history, pending);

        let skip = history.len().saturating_sub(limit);
        Ok(history.split_off(skip))
    }
}

fn next_current(map: &ConversationMap) -> Option<String> {
    map.values()
        .max_by(|a, b| a.updated_at.cmp(&b.updated_at))
        .map(|c| c.id.clone())
}
