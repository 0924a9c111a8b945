//! `openchat chat`
//!
//! Sends one message in the current (or chosen) conversation and streams
//! the reply to stdout. Ctrl-C stops the stream and keeps the partial reply.
//! `--regenerate` swaps the last reply for a fresh one.

use super::{open_storage, proxy_client};
use crate::client::{encode_data_url, load_image_file, OutgoingChat};
use crate::config::Config;
use crate::error::{OpenChatError, Result};
use crate::sanitize::render_message;
use crate::storage::{ImageRef, SqliteStorage, THINKING_PLACEHOLDER};
use crate::streaming::StreamingCallbacks;
use crate::types::{ChatMessage, CitationMap, Role};
use colored::Colorize;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Options for a single chat turn
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Message text
    pub prompt: String,
    /// Model override
    pub model: Option<String>,
    /// Conversation to continue instead of the current one
    pub conversation: Option<String>,
    /// Start a new conversation
    pub new: bool,
    /// Disable web search for this message
    pub no_web_search: bool,
    /// Image to attach
    pub image: Option<PathBuf>,
    /// Print the reply as sanitized HTML after streaming
    pub html: bool,
    /// Drop the last reply and send its prompt again
    pub regenerate: bool,
}

/// Writes the unseen suffix of the cumulative reply
///
/// The first write error is kept and cancels the stream.
#[derive(Debug)]
struct StreamPrinter<W: Write> {
    out: W,
    printed: usize,
    cancel: CancellationToken,
    error: Option<io::Error>,
}

impl<W: Write> StreamPrinter<W> {
    fn new(out: W, cancel: CancellationToken) -> Self {
        Self {
            out,
            printed: 0,
            cancel,
            error: None,
        }
    }

    fn write_delta(&mut self, content: &str) -> io::Result<()> {
        if let Some(delta) = content.get(self.printed..) {
            self.out.write_all(delta.as_bytes())?;
            self.out.flush()?;
        }
        self.printed = content.len();
        Ok(())
    }

    fn finish(self) -> io::Result<()> {
        self.error.map_or(Ok(()), Err)
    }
}

impl<W: Write> StreamingCallbacks for StreamPrinter<W> {
    fn on_content(&mut self, content: &str) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.write_delta(content) {
            tracing::debug!("Stopping stream after write error: {}", e);
            self.error = Some(e);
            self.cancel.cancel();
        }
    }
}

/// Where a turn goes and what it sends beyond the stored history
#[derive(Debug)]
struct Turn {
    conversation_id: String,
    pending: Vec<ChatMessage>,
    image_data_url: Option<String>,
}

/// Send a message and stream the reply
///
/// With `regenerate`, the last reply is removed and its prompt is sent
/// again without adding a new user message.
///
/// # Errors
///
/// Returns `OpenChatError::Validation` when the Terms of Service have not
/// been accepted, the prompt is empty or there is nothing to regenerate,
/// `OpenChatError::Io` when stdout cannot be written, and the proxy's error
/// otherwise. A failed reply is also written into the conversation.
pub async fn run_chat(config: &Config, options: ChatOptions) -> Result<()> {
    let storage = open_storage(config)?;
    if !storage.tos_accepted()? {
        return Err(OpenChatError::Validation(
            "Terms of Service not accepted; run `openchat settings accept-tos` first".to_string(),
        )
        .into());
    }

    let model = match options.model.clone() {
        Some(model) => model,
        None => storage.selected_model(&config.models.default_model)?,
    };
    let turn = prepare_turn(&storage, &options, &model)?;
    let conversation_id = turn.conversation_id;

    let messages =
        storage.messages_for_api(&conversation_id, &turn.pending, config.client.context_limit)?;
    let placeholder_id = storage.add_message(
        &conversation_id,
        &model,
        Role::Assistant,
        THINKING_PLACEHOLDER,
        None,
    )?;

    let system_prompt = storage.system_prompt()?;
    let chat = OutgoingChat {
        model: model.clone(),
        messages,
        web_search: !options.no_web_search && storage.web_search_enabled()?,
        image_data_url: turn.image_data_url,
        system_prompt: Some(system_prompt).filter(|p| !p.trim().is_empty()),
    };

    let client = proxy_client(config, &storage)?;
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    eprintln!("{}", format!("[{}] {}", model, conversation_id).dimmed());
    let mut printer = StreamPrinter::new(io::stdout(), cancel.clone());
    let outcome = client.send_chat(&chat, &mut printer, Some(&cancel)).await;
    ctrl_c.abort();
    let written = printer.finish();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            storage.update_message(
                &conversation_id,
                &placeholder_id,
                &format!("Error: {}", e),
                None,
            )?;
            return Err(e);
        }
    };

    storage.update_message(
        &conversation_id,
        &placeholder_id,
        &result.content,
        Some(&result.citations),
    )?;
    written.map_err(OpenChatError::Io)?;
    println!();

    if result.aborted {
        eprintln!("{}", "Stopped; partial reply saved.".yellow());
    }
    print_sources(&result.citations);

    if options.html {
        println!("{}", render_message(&result.content, &result.citations));
    }
    Ok(())
}

/// Pick the conversation and record the user side of the turn
fn prepare_turn(storage: &SqliteStorage, options: &ChatOptions, model: &str) -> Result<Turn> {
    if options.regenerate {
        let conversation_id = match &options.conversation {
            Some(id) => {
                storage.switch_conversation(id)?;
                id.clone()
            }
            None => storage.current_conversation_id()?.ok_or_else(|| {
                OpenChatError::Validation("No current conversation to regenerate".to_string())
            })?,
        };
        let prompt = storage
            .delete_last_assistant_message(&conversation_id)?
            .ok_or_else(|| {
                OpenChatError::Validation(format!(
                    "Nothing to regenerate in conversation {}",
                    conversation_id
                ))
            })?;
        tracing::debug!("Regenerating reply in {}", conversation_id);
        return Ok(Turn {
            conversation_id,
            pending: vec![ChatMessage::new(Role::User, prompt)],
            image_data_url: None,
        });
    }

    if options.prompt.trim().is_empty() && options.image.is_none() {
        return Err(OpenChatError::Validation("Message cannot be empty".to_string()).into());
    }
    let conversation_id = resolve_conversation(storage, options, model)?;

    let (image_ref, image_data_url) = match &options.image {
        Some(path) => {
            let (mime, bytes) = load_image_file(path)?;
            let id = storage.store_image(&bytes, &mime)?;
            let image_ref = ImageRef {
                id,
                mime: mime.clone(),
                name: path.file_name().map(|n| n.to_string_lossy().to_string()),
            };
            (Some(image_ref), Some(encode_data_url(&bytes, &mime)))
        }
        None => (None, None),
    };

    storage.add_message(
        &conversation_id,
        model,
        Role::User,
        options.prompt.trim(),
        image_ref.as_ref(),
    )?;
    Ok(Turn {
        conversation_id,
        pending: Vec::new(),
        image_data_url,
    })
}

fn resolve_conversation(
    storage: &SqliteStorage,
    options: &ChatOptions,
    model: &str,
) -> Result<String> {
    if options.new {
        return storage.create_conversation(model);
    }
    if let Some(id) = &options.conversation {
        storage.switch_conversation(id)?;
        return Ok(id.clone());
    }
    match storage.current_conversation_id()? {
        Some(id) if storage.get_conversation(&id)?.is_some() => Ok(id),
        _ => storage.create_conversation(model),
    }
}

fn print_sources(citations: &CitationMap) {
    if citations.is_empty() {
        return;
    }
    println!("\n{}", "Sources:".bold());
    let mut entries: Vec<_> = citations.iter().collect();
    entries.sort_by_key(|(key, _)| key.parse::<usize>().unwrap_or(usize::MAX));
    for (key, citation) in entries {
        let number = key.parse::<usize>().map(|n| n + 1).unwrap_or(0);
        let title = citation
            .title
            .as_deref()
            .or(citation.url.as_deref())
            .unwrap_or("source");
        println!(
            "  [{}] {} {}",
            number,
            title,
            citation.url.as_deref().unwrap_or("").cyan()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::create_test_storage;

    /// Accepts `limit` bytes, then fails like a closed pipe
    struct ClosedAfter {
        written: Vec<u8>,
        limit: usize,
    }

    impl Write for ClosedAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written.len() + buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn accepted_options() -> ChatOptions {
        ChatOptions {
            prompt: "Tell me about Rust".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_printer_tracks_cumulative_content() {
        let mut printer = StreamPrinter::new(Vec::new(), CancellationToken::new());
        printer.on_content("Hé");
        assert_eq!(printer.printed, "Hé".len());
        printer.on_content("Héllo");
        assert_eq!(printer.printed, "Héllo".len());
        assert_eq!(printer.out, "Héllo".as_bytes());
        assert!(printer.finish().is_ok());
    }

    #[test]
    fn test_printer_write_error_cancels_and_is_returned() {
        let cancel = CancellationToken::new();
        let out = ClosedAfter {
            written: Vec::new(),
            limit: 3,
        };
        let mut printer = StreamPrinter::new(out, cancel.clone());
        printer.on_content("abc");
        assert!(!cancel.is_cancelled());
        printer.on_content("abcdef");
        assert!(cancel.is_cancelled());
        printer.on_content("abcdefghi");
        assert_eq!(printer.out.written, b"abc");

        let err = printer.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_prepare_turn_records_user_message() {
        let (storage, _dir) = create_test_storage();
        let turn = prepare_turn(&storage, &accepted_options(), "m").unwrap();
        assert!(turn.pending.is_empty());
        assert!(turn.image_data_url.is_none());
        let conversation = storage.get_conversation(&turn.conversation_id).unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].content, "Tell me about Rust");

        let blank = ChatOptions {
            prompt: "   ".to_string(),
            ..Default::default()
        };
        assert!(prepare_turn(&storage, &blank, "m").is_err());
    }

    #[test]
    fn test_prepare_turn_regenerate_resends_prompt() {
        let (storage, _dir) = create_test_storage();
        let first = prepare_turn(&storage, &accepted_options(), "m").unwrap();
        let id = first.conversation_id;
        storage
            .add_message(&id, "m", Role::Assistant, "A systems language.", None)
            .unwrap();

        let options = ChatOptions {
            regenerate: true,
            ..Default::default()
        };
        let turn = prepare_turn(&storage, &options, "m").unwrap();
        assert_eq!(turn.conversation_id, id);
        assert_eq!(
            turn.pending,
            vec![ChatMessage::new(Role::User, "Tell me about Rust")]
        );

        let conversation = storage.get_conversation(&id).unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].role, Role::User);
        let messages = storage.messages_for_api(&id, &turn.pending, 5).unwrap();
        assert_eq!(messages, turn.pending);
    }

    #[test]
    fn test_prepare_turn_regenerate_without_reply_fails() {
        let (storage, _dir) = create_test_storage();
        let options = ChatOptions {
            regenerate: true,
            ..Default::default()
        };
        let err = prepare_turn(&storage, &options, "m").unwrap_err();
        assert!(err.to_string().contains("No current conversation"));

        let id = prepare_turn(&storage, &accepted_options(), "m")
            .unwrap()
            .conversation_id;
        let err = prepare_turn(&storage, &options, "m").unwrap_err();
        assert!(err.to_string().contains("Nothing to regenerate"));
        assert_eq!(storage.get_conversation(&id).unwrap().unwrap().messages.len(), 1);
    }

    #[test]
    fn test_resolve_conversation_prefers_current() {
        let (storage, _dir) = create_test_storage();
        let options = ChatOptions::default();
        let first = resolve_conversation(&storage, &options, "m").unwrap();
        assert_eq!(resolve_conversation(&storage, &options, "m").unwrap(), first);

        let fresh = ChatOptions {
            new: true,
            ..Default::default()
        };
        let second = resolve_conversation(&storage, &fresh, "m").unwrap();
        assert_ne!(second, first);
        assert_eq!(storage.current_conversation_id().unwrap(), Some(second));
    }

    #[test]
    fn test_resolve_conversation_rejects_unknown_id() {
        let (storage, _dir) = create_test_storage();
        let options = ChatOptions {
            conversation: Some("conv_missing".to_string()),
            ..Default::default()
        };
        assert!(resolve_conversation(&storage, &options, "m").is_err());
    }
}
