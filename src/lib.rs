//! OpenChat - chat proxy and terminal client for the Venice AI API
//!
//! This library provides the proxy server, the streaming client and the
//! local persistence used by the `openchat` binary.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `server`: axum routes for chat, image, upscale and info, with CORS,
//!   Terms of Service, deployment password and rate-limit guards
//! - `rate_limit`: Sliding-window limiter keyed by client IP
//! - `upstream` / `models`: Venice API client and cached, price-filtered model catalog
//! - `streaming`: Server-sent-events parser for chat replies
//! - `markdown` / `sanitize`: Markdown-with-citations renderer and HTML sanitizer
//! - `storage`: SQLite-backed settings, conversations and images
//! - `client` / `scheduler`: Proxy client and the daily scheduled prompt
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use openchat::{server, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let bind = config.server.bind_address.clone();
//!     let state = server::AppState::new(config)?;
//!     server::serve(state, &bind).await
//! }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod markdown;
pub mod models;
pub mod rate_limit;
pub mod sanitize;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod streaming;
pub mod types;
pub mod upstream;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use error::{OpenChatError, Result};
pub use sanitize::render_message;
pub use streaming::{parse_streaming_response, StreamingCallbacks, StreamingResult};
