//! `openchat serve`

use crate::config::Config;
use crate::error::Result;
use crate::server::{self, AppState};

/// Run the proxy until Ctrl-C
///
/// # Arguments
///
/// * `config` - Loaded configuration (consumed)
/// * `bind` - Optional override for `server.bind_address`
pub async fn run_serve(config: Config, bind: Option<String>) -> Result<()> {
    let bind_address = bind.unwrap_or_else(|| config.server.bind_address.clone());
    tracing::info!(
        "Starting OpenChat proxy: upstream={}, limits chat={} image={} upscale={} per {}",
        config.upstream.base_url,
        config.rate_limit.chat_requests,
        config.rate_limit.image_requests,
        config.rate_limit.upscale_requests,
        config.rate_limit.window_label()
    );

    let state = AppState::new(config)?;
    server::serve(state, &bind_address).await
}
