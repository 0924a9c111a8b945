use super::open_storage;
use crate::cli::HistoryCommand;
use crate::config::Config;
use crate::error::{OpenChatError, Result};
use crate::sanitize::render_message;
use crate::storage::{Conversation, SqliteStorage};
use crate::types::{CitationMap, Role};
use colored::Colorize;
use prettytable::{format, Table};

/// Handle history commands
pub fn handle_history(config: &Config, command: HistoryCommand) -> Result<()> {
    let storage = open_storage(config)?;

    match command {
        HistoryCommand::List => list(&storage)?,
        HistoryCommand::Show { id, html } => {
            let conversation = find(&storage, &id)?;
            show(&conversation, html);
        }
        HistoryCommand::Rename { id, title } => {
            storage.rename_conversation(&id, &title)?;
            println!("{}", format!("Renamed conversation {}", id).green());
        }
        HistoryCommand::Delete { id } => {
            if storage.delete_conversation(&id)? {
                println!("{}", format!("Deleted conversation {}", id).green());
            } else {
                println!("{}", format!("No conversation with id {}", id).yellow());
            }
        }
        HistoryCommand::Clear { id } => {
            storage.clear_conversation(&id)?;
            println!("{}", format!("Cleared conversation {}", id).green());
        }
        HistoryCommand::Switch { id } => {
            storage.switch_conversation(&id)?;
            println!("{}", format!("Switched to conversation {}", id).green());
        }
    }

    Ok(())
}

fn find(storage: &SqliteStorage, id: &str) -> Result<Conversation> {
    storage
        .get_conversation(id)?
        .ok_or_else(|| OpenChatError::NotFound(format!("conversation {}", id)).into())
}

fn list(storage: &SqliteStorage) -> Result<()> {
    let conversations = storage.list_conversations()?;

    if conversations.is_empty() {
        println!("{}", "No conversation history found.".yellow());
        return Ok(());
    }

    let current = storage.current_conversation_id()?;

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Model".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for conversation in conversations {
        let marker = if current.as_deref() == Some(conversation.id.as_str()) {
            "*"
        } else if conversation.is_scheduled {
            "@"
        } else {
            " "
        };
        let title = if conversation.title.chars().count() > 40 {
            format!(
                "{}...",
                conversation.title.chars().take(37).collect::<String>()
            )
        } else {
            conversation.title
        };
        let updated = conversation
            .updated_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string();

        table.add_row(prettytable::row![
            format!("{} {}", marker, conversation.id).cyan(),
            title,
            conversation.model,
            conversation.message_count,
            updated
        ]);
    }

    println!("\nConversation History:");
    table.printstd();
    println!();
    println!(
        "{} current, {} scheduled. Use {} to continue a conversation.",
        "*".cyan(),
        "@".cyan(),
        "openchat history switch <ID>".cyan()
    );
    println!();
    Ok(())
}

fn show(conversation: &Conversation, html: bool) {
    println!(
        "\n{} {}",
        conversation.title.bold(),
        format!("({}, {})", conversation.id, conversation.model).dimmed()
    );

    for message in &conversation.messages {
        let label = match message.role {
            Role::User => "You".green().bold(),
            Role::Assistant => "Assistant".blue().bold(),
            Role::System => "System".magenta().bold(),
        };
        println!("\n{}", label);

        if let Some(name) = message.image_name.as_deref().or(message.image_id.as_deref()) {
            println!("{}", format!("[image: {}]", name).dimmed());
        }

        if html && message.role == Role::Assistant {
            let empty = CitationMap::new();
            let citations = message.citations.as_ref().unwrap_or(&empty);
            println!("{}", render_message(&message.content, citations));
        } else {
            println!("{}", message.content);
        }
    }
    println!();
}
