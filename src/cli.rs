//! Command-line interface definition for OpenChat
//!
//! This module defines the CLI structure using clap's derive API. The
//! `serve` command runs the proxy; every other command is a client of a
//! running proxy or of the local settings database.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// OpenChat - chat proxy and terminal client for the Venice AI API
#[derive(Parser, Debug, Clone)]
#[command(name = "openchat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Base URL of the OpenChat proxy used by client commands
    #[arg(long, env = "OPENCHAT_SERVER_URL")]
    pub server_url: Option<String>,

    /// Path to the local settings and conversation database
    #[arg(long, env = "OPENCHAT_DATA_DB")]
    pub storage_path: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for OpenChat
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the API proxy server
    Serve {
        /// Address to bind (overrides server.bind_address)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Send a message and stream the reply
    Chat {
        /// Message text
        #[arg(required_unless_present = "regenerate")]
        prompt: Option<String>,

        /// Model to use (defaults to the selected model setting)
        #[arg(short, long)]
        model: Option<String>,

        /// Continue an existing conversation instead of the current one
        #[arg(long)]
        conversation: Option<String>,

        /// Start a new conversation
        #[arg(long)]
        new: bool,

        /// Disable web search for this message
        #[arg(long)]
        no_web_search: bool,

        /// Attach an image file (png, jpeg or webp)
        #[arg(long)]
        image: Option<PathBuf>,

        /// Print the reply as sanitized HTML after streaming completes
        #[arg(long)]
        html: bool,

        /// Replace the last reply by sending its prompt again
        #[arg(long, conflicts_with_all = ["prompt", "new", "image"])]
        regenerate: bool,
    },

    /// Render markdown with citations to sanitized HTML
    Render {
        /// Markdown file to render (reads stdin when omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// JSON file holding a citation map (`{"0": {"url": ...}}`)
        #[arg(long)]
        citations: Option<PathBuf>,
    },

    /// Generate an image
    Image {
        /// Text prompt
        prompt: String,

        /// Image model (defaults to the selected image model setting)
        #[arg(short, long)]
        model: Option<String>,

        /// Output size as WIDTHxHEIGHT
        #[arg(short, long, default_value = "1024x1024")]
        size: String,

        /// Output format (png, jpeg, webp)
        #[arg(short, long, default_value = "png")]
        format: String,

        /// Write the decoded image to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upscale an image
    Upscale {
        /// Source image file
        input: PathBuf,

        /// Scale factor (1-4)
        #[arg(short, long, default_value_t = 2.0)]
        scale: f64,

        /// Disable enhancement
        #[arg(long)]
        no_enhance: bool,

        /// Write the upscaled image to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show proxy information (models, limits, pricing filter)
    Info {
        /// Print the raw JSON payload
        #[arg(long)]
        json: bool,
    },

    /// Manage conversation history
    History {
        /// History management subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Manage persisted client settings
    Settings {
        /// Settings subcommand
        #[command(subcommand)]
        command: SettingsCommand,
    },

    /// Manage the daily scheduled prompt
    Schedule {
        /// Schedule subcommand
        #[command(subcommand)]
        command: ScheduleCommand,
    },
}

/// Conversation history subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List conversations, most recently updated first
    List,

    /// Show the messages of a conversation
    Show {
        /// Conversation ID
        id: String,

        /// Render assistant messages as sanitized HTML
        #[arg(long)]
        html: bool,
    },

    /// Rename a conversation
    Rename {
        /// Conversation ID
        id: String,

        /// New title (blank resets to "New Chat")
        title: String,
    },

    /// Delete a conversation and its stored images
    Delete {
        /// Conversation ID
        id: String,
    },

    /// Remove all messages from a conversation, keeping the conversation
    Clear {
        /// Conversation ID
        id: String,
    },

    /// Make a conversation the current one for `chat`
    Switch {
        /// Conversation ID
        id: String,
    },
}

/// Settings subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Print all persisted settings
    Show,

    /// Set a setting by key
    Set {
        /// Setting key (theme, selectedModel, webSearchEnabled, ...)
        key: String,

        /// New value
        value: String,
    },

    /// Accept the Terms of Service
    AcceptTos,
}

/// Scheduled prompt subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ScheduleCommand {
    /// Print the scheduled prompt settings and next run time
    Show,

    /// Configure the scheduled prompt
    Set {
        /// Prompt text
        #[arg(long)]
        prompt: Option<String>,

        /// Hour of day (0-23)
        #[arg(long)]
        hour: Option<u32>,

        /// Minute (0-59)
        #[arg(long)]
        minute: Option<u32>,

        /// Model override (empty string clears it)
        #[arg(long)]
        model: Option<String>,

        /// Web search mode: current, on or off
        #[arg(long)]
        web_search: Option<String>,

        /// Enable the schedule
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable the schedule
        #[arg(long)]
        disable: bool,
    },

    /// Keep running and fire the prompt at its scheduled time
    Run,

    /// Fire the prompt once now without recording a daily run
    Test,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            server_url: None,
            storage_path: None,
            command: Commands::Serve { bind: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { bind: None }));
    }

    #[test]
    fn test_cli_parse_serve_with_bind() {
        let cli = Cli::try_parse_from(["openchat", "serve", "--bind", "0.0.0.0:8080"]).unwrap();
        if let Commands::Serve { bind } = cli.command {
            assert_eq!(bind.as_deref(), Some("0.0.0.0:8080"));
        } else {
            panic!("Expected Serve command");
        }
    }

    #[test]
    fn test_cli_parse_chat_command() {
        let cli = Cli::try_parse_from([
            "openchat",
            "chat",
            "hello there",
            "--model",
            "llama-3.3-70b",
            "--no-web-search",
        ])
        .unwrap();
        if let Commands::Chat {
            prompt,
            model,
            no_web_search,
            new,
            ..
        } = cli.command
        {
            assert_eq!(prompt.as_deref(), Some("hello there"));
            assert_eq!(model.as_deref(), Some("llama-3.3-70b"));
            assert!(no_web_search);
            assert!(!new);
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_cli_parse_chat_requires_prompt() {
        let cli = Cli::try_parse_from(["openchat", "chat"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_parse_chat_regenerate() {
        let cli = Cli::try_parse_from(["openchat", "chat", "--regenerate"]).unwrap();
        if let Commands::Chat {
            prompt, regenerate, ..
        } = cli.command
        {
            assert!(regenerate);
            assert!(prompt.is_none());
        } else {
            panic!("Expected Chat command");
        }

        assert!(Cli::try_parse_from(["openchat", "chat", "hi", "--regenerate"]).is_err());
        assert!(Cli::try_parse_from(["openchat", "chat", "--regenerate", "--new"]).is_err());
    }

    #[test]
    fn test_cli_parse_image_defaults() {
        let cli = Cli::try_parse_from(["openchat", "image", "a red fox"]).unwrap();
        if let Commands::Image {
            size, format, model, ..
        } = cli.command
        {
            assert_eq!(size, "1024x1024");
            assert_eq!(format, "png");
            assert!(model.is_none());
        } else {
            panic!("Expected Image command");
        }
    }

    #[test]
    fn test_cli_parse_history_rename() {
        let cli = Cli::try_parse_from(["openchat", "history", "rename", "conv_1", "Trip"]).unwrap();
        if let Commands::History {
            command: HistoryCommand::Rename { id, title },
        } = cli.command
        {
            assert_eq!(id, "conv_1");
            assert_eq!(title, "Trip");
        } else {
            panic!("Expected History Rename command");
        }
    }

    #[test]
    fn test_cli_parse_schedule_set_conflicting_flags() {
        let cli = Cli::try_parse_from(["openchat", "schedule", "set", "--enable", "--disable"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "openchat",
            "--server-url",
            "http://localhost:4000",
            "--storage-path",
            "/tmp/openchat.db",
            "info",
        ])
        .unwrap();
        assert_eq!(cli.server_url.as_deref(), Some("http://localhost:4000"));
        assert_eq!(cli.storage_path.as_deref(), Some("/tmp/openchat.db"));
        assert!(matches!(cli.command, Commands::Info { json: false }));
    }
}
