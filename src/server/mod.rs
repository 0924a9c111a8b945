//! HTTP proxy in front of the Venice AI API
//!
//! Four routes share one [`AppState`]:
//!
//! - `POST /api/chat` - validated chat completions, streamed or buffered
//! - `POST /api/image` - image generation
//! - `POST /api/upscale` - image upscaling
//! - `GET /api/info` - model catalog and deployment settings
//!
//! Every route answers `OPTIONS` with 204 and every response carries CORS
//! headers.

pub mod chat;
pub mod cors;
pub mod error;
pub mod guards;
pub mod image;
pub mod info;
pub mod upscale;

pub use error::ApiError;

use crate::config::Config;
use crate::error::Result;
use crate::models::ModelCatalog;
use crate::rate_limit::RateLimiter;
use crate::upstream::VeniceClient;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<Config>,
    /// Provider client
    pub upstream: VeniceClient,
    /// Cached model catalog
    pub catalog: ModelCatalog,
    /// Bucket for `/api/chat`
    pub chat_limiter: RateLimiter,
    /// Bucket for `/api/image`
    pub image_limiter: RateLimiter,
    /// Bucket for `/api/upscale`
    pub upscale_limiter: RateLimiter,
}

impl AppState {
    /// Build state from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream HTTP client cannot be created.
    pub fn new(config: Config) -> Result<Self> {
        let upstream = VeniceClient::new(&config.upstream)?;
        let catalog = ModelCatalog::new(
            upstream.clone(),
            config.models.clone(),
            Duration::from_secs(config.upstream.models_cache_ttl_seconds),
        );
        let cleanup = config.rate_limit.cleanup_interval_seconds;

        Ok(Self {
            config: Arc::new(config),
            upstream,
            catalog,
            chat_limiter: RateLimiter::new(cleanup),
            image_limiter: RateLimiter::new(cleanup),
            upscale_limiter: RateLimiter::new(cleanup),
        })
    }
}

/// Build the router with all routes and the CORS layer
pub fn router(state: AppState) -> Router {
    cors::warn_if_open(state.config.server.allowed_origin.as_deref());

    Router::new()
        .route(
            "/api/chat",
            post(chat::handle_chat).options(cors::preflight),
        )
        .route(
            "/api/image",
            post(image::handle_image).options(cors::preflight),
        )
        .route(
            "/api/upscale",
            post(upscale::handle_upscale).options(cors::preflight),
        )
        .route("/api/info", get(info::handle_info).options(cors::preflight))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            cors::apply_cors,
        ))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(state: AppState, bind_address: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!("OpenChat proxy listening on {}", listener.local_addr()?);

    if !state.upstream.has_api_key() {
        tracing::warn!("VENICE_API_KEY is not set; chat and image routes will return 500");
    }

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("OpenChat proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
