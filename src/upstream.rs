//! HTTP client for the Venice AI API
//!
//! Thin wrapper over `reqwest` that knows the endpoint layout and attaches
//! the bearer token. Status handling is left to callers: a request that
//! reached the provider returns `Ok(response)` whatever its status, and only
//! transport failures surface as errors.

use crate::config::UpstreamConfig;
use crate::error::{OpenChatError, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// One entry of the provider's `/models` listing
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamModel {
    /// Model identifier
    pub id: String,
    /// Model kind, e.g. `text`, `image`, `upscale`
    #[serde(rename = "type", default)]
    pub model_type: String,
    /// Provider-supplied details
    #[serde(default)]
    pub model_spec: Option<ModelSpec>,
}

/// Details attached to an [`UpstreamModel`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelSpec {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Token pricing
    #[serde(default)]
    pub pricing: Option<ModelPricing>,
    /// Capability flags; absent flags read as false
    #[serde(default)]
    pub capabilities: Option<crate::types::ModelCapabilities>,
}

/// USD prices per million tokens
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPricing {
    /// Input token price
    #[serde(default)]
    pub input: Option<UsdPrice>,
    /// Output token price
    #[serde(default)]
    pub output: Option<UsdPrice>,
}

/// A single price point
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UsdPrice {
    /// Price in US dollars
    #[serde(default)]
    pub usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<UpstreamModel>,
}

/// Venice API client
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct VeniceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl VeniceClient {
    /// Create a client from upstream configuration
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Config` if the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```
    /// use openchat::config::UpstreamConfig;
    /// use openchat::upstream::VeniceClient;
    ///
    /// let client = VeniceClient::new(&UpstreamConfig::default()).unwrap();
    /// assert_eq!(client.base_url(), "https://api.venice.ai/api/v1");
    /// ```
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("openchat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OpenChatError::Config(format!("Failed to create HTTP client: {}", e)))?;

        tracing::debug!("Initialized Venice client: base_url={}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns true when an API key is configured
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            OpenChatError::MissingCredentials("Venice API key not configured".to_string()).into()
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// List models of one kind
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Upstream` for a non-success status, or a
    /// transport or decoding error.
    pub async fn list_models(&self, model_type: &str) -> Result<Vec<UpstreamModel>> {
        let url = self.url("models");
        tracing::debug!("Fetching {} models from {}", model_type, url);

        let response = self
            .client
            .get(&url)
            .query(&[("type", model_type)])
            .bearer_auth(self.api_key()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OpenChatError::Upstream(format!(
                "Venice API error: {}",
                response.status().as_u16()
            ))
            .into());
        }

        let body: ModelsResponse = response.json().await?;
        Ok(body.data)
    }

    /// POST a chat completion request
    pub async fn chat_completions(&self, body: &Value) -> Result<reqwest::Response> {
        self.post_json("chat/completions", body).await
    }

    /// POST an image generation request
    pub async fn generate_image(&self, body: &Value) -> Result<reqwest::Response> {
        self.post_json("images/generations", body).await
    }

    /// POST an image upscale request
    pub async fn upscale(&self, body: &Value) -> Result<reqwest::Response> {
        self.post_json("image/upscale", body).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key()?)
            .json(body)
            .send()
            .await?;
        Ok(response)
    }
}
