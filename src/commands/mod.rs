/*!
Command handlers for the CLI

Each subcommand has a `run_*` entry point invoked from `main`:

- `serve`    - Run the proxy server
- `chat`     - Send a message and stream the reply
- `render`   - Render markdown with citations to sanitized HTML
- `image`    - Generate and upscale images
- `info`     - Show proxy information
- `history`  - Manage stored conversations
- `settings` - Read and write persisted preferences
- `schedule` - Configure and run the daily scheduled prompt
*/

use crate::client::ChatClient;
use crate::config::Config;
use crate::error::Result;
use crate::storage::SqliteStorage;

pub mod chat;
pub mod history;
pub mod image;
pub mod info;
pub mod render;
pub mod schedule;
pub mod serve;
pub mod settings;

/// Open the configured client database
pub(crate) fn open_storage(config: &Config) -> Result<SqliteStorage> {
    let storage = SqliteStorage::open(config.client.data_db.as_deref())?;
    tracing::debug!("Using storage at {}", storage.db_path().display());
    Ok(storage)
}

/// Build a proxy client carrying the stored deployment password
pub(crate) fn proxy_client(config: &Config, storage: &SqliteStorage) -> Result<ChatClient> {
    let password = storage.deployment_password()?;
    ChatClient::new(&config.client, Some(password))
}
