//! Configuration management for OpenChat
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! Both the proxy server (`openchat serve`) and the client commands read
//! the same file; each only looks at the sections it needs.

use crate::error::{OpenChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for OpenChat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Proxy server settings (bind address, CORS origin, deployment password)
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream inference provider settings
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Per-route sliding-window rate limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Model allow-list and pricing policy
    #[serde(default)]
    pub models: ModelPolicy,
    /// Request validation limits and defaults for chat/image requests
    #[serde(default)]
    pub limits: RequestLimits,
    /// Settings for the command-line client
    #[serde(default)]
    pub client: ClientConfig,
}

/// Proxy server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the server listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Value for `Access-Control-Allow-Origin`; `*` when unset
    #[serde(default)]
    pub allowed_origin: Option<String>,

    /// Shared password required in `X-Deployment-Password` when set
    #[serde(default)]
    pub deployment_password: Option<String>,
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            allowed_origin: None,
            deployment_password: None,
        }
    }
}

/// Upstream (Venice AI) provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// API base URL; overridable so tests can point at a mock server
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,

    /// Bearer token for the upstream API. Usually supplied via `VENICE_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout for non-streaming upstream calls (seconds)
    #[serde(default = "default_upstream_timeout")]
    pub timeout_seconds: u64,

    /// How long a fetched model catalog stays fresh (seconds)
    #[serde(default = "default_models_cache_ttl")]
    pub models_cache_ttl_seconds: u64,
}

fn default_upstream_base_url() -> String {
    "https://api.venice.ai/api/v1".to_string()
}

fn default_upstream_timeout() -> u64 {
    120
}

fn default_models_cache_ttl() -> u64 {
    300
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            api_key: None,
            timeout_seconds: default_upstream_timeout(),
            models_cache_ttl_seconds: default_models_cache_ttl(),
        }
    }
}

/// Rate limit configuration
///
/// Each route has its own bucket per client IP. All buckets share the
/// same window length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Chat requests allowed per client per window
    #[serde(default = "default_chat_requests")]
    pub chat_requests: u32,

    /// Image generation requests allowed per client per window
    #[serde(default = "default_image_requests")]
    pub image_requests: u32,

    /// Upscale requests allowed per client per window
    #[serde(default = "default_image_requests")]
    pub upscale_requests: u32,

    /// Sliding window length (seconds)
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Minimum interval between sweeps of idle clients (seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_chat_requests() -> u32 {
    20
}

fn default_image_requests() -> u32 {
    5
}

fn default_window_seconds() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    300
}

impl RateLimitConfig {
    /// Window length in milliseconds
    pub fn window_ms(&self) -> i64 {
        (self.window_seconds as i64).saturating_mul(1000)
    }

    /// Human-readable window label used in API payloads ("1 hour", "30 minutes")
    pub fn window_label(&self) -> String {
        let secs = self.window_seconds;
        if secs % 3600 == 0 {
            let hours = secs / 3600;
            if hours == 1 {
                "1 hour".to_string()
            } else {
                format!("{} hours", hours)
            }
        } else if secs % 60 == 0 {
            let minutes = secs / 60;
            if minutes == 1 {
                "1 minute".to_string()
            } else {
                format!("{} minutes", minutes)
            }
        } else {
            format!("{} seconds", secs)
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            chat_requests: default_chat_requests(),
            image_requests: default_image_requests(),
            upscale_requests: default_image_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

/// Model allow-list and pricing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPolicy {
    /// Text model that is always allowed, regardless of pricing
    #[serde(default = "default_text_model")]
    pub default_model: String,

    /// Image model used when a request does not name one
    #[serde(default = "default_image_model")]
    pub default_image_model: String,

    /// Maximum USD price per 1M input tokens
    #[serde(default = "default_max_input_price")]
    pub max_input_price: f64,

    /// Maximum USD price per 1M output tokens
    #[serde(default = "default_max_output_price")]
    pub max_output_price: f64,

    /// Image and upscale models the proxy will forward
    #[serde(default = "default_image_models")]
    pub image_models: Vec<String>,

    /// Text models served when the upstream catalog cannot be fetched
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,
}

fn default_text_model() -> String {
    "zai-org-glm-5".to_string()
}

fn default_image_model() -> String {
    "nano-banana-pro".to_string()
}

fn default_max_input_price() -> f64 {
    2.0
}

fn default_max_output_price() -> f64 {
    6.0
}

fn default_image_models() -> Vec<String> {
    ["nano-banana-pro", "venice-sd35", "seedream-v4", "upscaler"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fallback_models() -> Vec<String> {
    [
        "llama-3.3-70b",
        "deepseek-r1-distill-llama-70b",
        "dolphin-2.9.2-qwen2-72b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self {
            default_model: default_text_model(),
            default_image_model: default_image_model(),
            max_input_price: default_max_input_price(),
            max_output_price: default_max_output_price(),
            image_models: default_image_models(),
            fallback_models: default_fallback_models(),
        }
    }
}

/// Request validation limits and forwarding defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLimits {
    /// Maximum number of messages in one chat request
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Maximum characters per message (and per image prompt)
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Maximum characters in a custom system prompt
    #[serde(default = "default_max_system_prompt_length")]
    pub max_system_prompt_length: usize,

    /// `max_tokens` forwarded when the request omits it
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// `temperature` forwarded when the request omits it
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,

    /// Smallest accepted image edge (pixels)
    #[serde(default = "default_min_image_dimension")]
    pub min_image_dimension: u32,

    /// Largest accepted image edge (pixels)
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
}

fn default_max_messages() -> usize {
    50
}

fn default_max_message_length() -> usize {
    8000
}

fn default_max_system_prompt_length() -> usize {
    4000
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f64 {
    0.7
}

fn default_min_image_dimension() -> u32 {
    64
}

fn default_max_image_dimension() -> u32 {
    2048
}

impl RequestLimits {
    /// Upper bound for forwarded `max_tokens` (twice the default)
    pub fn max_tokens_ceiling(&self) -> u32 {
        self.default_max_tokens.saturating_mul(2)
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_message_length: default_max_message_length(),
            max_system_prompt_length: default_max_system_prompt_length(),
            default_max_tokens: default_max_tokens(),
            default_temperature: default_temperature(),
            min_image_dimension: default_min_image_dimension(),
            max_image_dimension: default_max_image_dimension(),
        }
    }
}

/// Command-line client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of a running OpenChat proxy
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Path of the local settings/conversation database. Defaults to the
    /// platform data directory.
    #[serde(default)]
    pub data_db: Option<String>,

    /// Number of most recent messages sent as chat context
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    /// Request timeout for non-streaming calls (seconds)
    #[serde(default = "default_client_timeout")]
    pub timeout_seconds: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_context_limit() -> usize {
    5
}

fn default_client_timeout() -> u64 {
    120
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            data_db: None,
            context_limit: default_context_limit(),
            timeout_seconds: default_client_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file. A missing file is not
    ///   an error; defaults are used instead.
    /// * `cli` - Parsed command line, applied last
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Config` if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| OpenChatError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| OpenChatError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(api_key) = std::env::var("VENICE_API_KEY") {
            if !api_key.is_empty() {
                self.upstream.api_key = Some(api_key);
            }
        }

        if let Ok(password) = std::env::var("DEPLOYMENT_PASSWORD") {
            if !password.is_empty() {
                self.server.deployment_password = Some(password);
            }
        }

        if let Ok(origin) = std::env::var("ALLOWED_ORIGIN") {
            if !origin.is_empty() {
                self.server.allowed_origin = Some(origin);
            }
        }

        if let Ok(bind) = std::env::var("OPENCHAT_BIND_ADDRESS") {
            self.server.bind_address = bind;
        }

        if let Ok(url) = std::env::var("OPENCHAT_UPSTREAM_URL") {
            self.upstream.base_url = url;
        }

        if let Ok(limit) = std::env::var("OPENCHAT_RATE_LIMIT") {
            if let Ok(value) = limit.parse() {
                self.rate_limit.chat_requests = value;
            } else {
                tracing::warn!("Invalid OPENCHAT_RATE_LIMIT: {}", limit);
            }
        }

        if let Ok(limit) = std::env::var("OPENCHAT_RATE_LIMIT_IMAGE") {
            if let Ok(value) = limit.parse() {
                self.rate_limit.image_requests = value;
            } else {
                tracing::warn!("Invalid OPENCHAT_RATE_LIMIT_IMAGE: {}", limit);
            }
        }

        if let Ok(limit) = std::env::var("OPENCHAT_RATE_LIMIT_UPSCALE") {
            if let Ok(value) = limit.parse() {
                self.rate_limit.upscale_requests = value;
            } else {
                tracing::warn!("Invalid OPENCHAT_RATE_LIMIT_UPSCALE: {}", limit);
            }
        }

        if let Ok(url) = std::env::var("OPENCHAT_SERVER_URL") {
            self.client.server_url = url;
        }

        if let Ok(db) = std::env::var("OPENCHAT_DATA_DB") {
            self.client.data_db = Some(db);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(url) = &cli.server_url {
            self.client.server_url = url.clone();
        }

        if let Some(db) = &cli.storage_path {
            self.client.data_db = Some(db.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(
                OpenChatError::Config("upstream.base_url cannot be empty".to_string()).into(),
            );
        }

        if url::Url::parse(&self.upstream.base_url).is_err() {
            return Err(OpenChatError::Config(format!(
                "upstream.base_url is not a valid URL: {}",
                self.upstream.base_url
            ))
            .into());
        }

        if self.client.server_url.trim().is_empty() {
            return Err(
                OpenChatError::Config("client.server_url cannot be empty".to_string()).into(),
            );
        }

        if self.rate_limit.chat_requests == 0
            || self.rate_limit.image_requests == 0
            || self.rate_limit.upscale_requests == 0
        {
            return Err(OpenChatError::Config(
                "rate_limit request counts must be greater than 0".to_string(),
            )
            .into());
        }

        if self.rate_limit.window_seconds == 0 {
            return Err(OpenChatError::Config(
                "rate_limit.window_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.models.default_model.trim().is_empty() {
            return Err(
                OpenChatError::Config("models.default_model cannot be empty".to_string()).into(),
            );
        }

        if self.models.image_models.is_empty() {
            return Err(
                OpenChatError::Config("models.image_models cannot be empty".to_string()).into(),
            );
        }

        if self.models.max_input_price < 0.0 || self.models.max_output_price < 0.0 {
            return Err(OpenChatError::Config(
                "models price thresholds must not be negative".to_string(),
            )
            .into());
        }

        if self.limits.max_messages == 0 || self.limits.max_message_length == 0 {
            return Err(OpenChatError::Config(
                "limits.max_messages and limits.max_message_length must be greater than 0"
                    .to_string(),
            )
            .into());
        }

        if self.limits.min_image_dimension > self.limits.max_image_dimension {
            return Err(OpenChatError::Config(
                "limits.min_image_dimension must not exceed limits.max_image_dimension"
                    .to_string(),
            )
            .into());
        }

        if !(0.0..=2.0).contains(&self.limits.default_temperature) {
            return Err(OpenChatError::Config(
                "limits.default_temperature must be between 0 and 2".to_string(),
            )
            .into());
        }

        if self.client.context_limit == 0 {
            return Err(OpenChatError::Config(
                "client.context_limit must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "127.0.0.1:3000");
        assert_eq!(config.upstream.base_url, "https://api.venice.ai/api/v1");
        assert_eq!(config.rate_limit.chat_requests, 20);
        assert_eq!(config.rate_limit.image_requests, 5);
        assert_eq!(config.rate_limit.upscale_requests, 5);
        assert_eq!(config.rate_limit.window_seconds, 3600);
        assert_eq!(config.models.default_model, "zai-org-glm-5");
        assert_eq!(config.limits.max_messages, 50);
        assert_eq!(config.limits.default_max_tokens, 2048);
        assert_eq!(config.client.context_limit, 5);
    }

    #[test]
    fn test_config_validation_success() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_base_url() {
        let mut config = Config::default();
        config.upstream.base_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_base_url() {
        let mut config = Config::default();
        config.upstream.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_rate_limit() {
        let mut config = Config::default();
        config.rate_limit.image_requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_window() {
        let mut config = Config::default();
        config.rate_limit.window_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_inverted_dimensions() {
        let mut config = Config::default();
        config.limits.min_image_dimension = 4096;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_temperature_out_of_range() {
        let mut config = Config::default();
        config.limits.default_temperature = 2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_label() {
        let mut rate_limit = RateLimitConfig::default();
        assert_eq!(rate_limit.window_label(), "1 hour");
        rate_limit.window_seconds = 7200;
        assert_eq!(rate_limit.window_label(), "2 hours");
        rate_limit.window_seconds = 1800;
        assert_eq!(rate_limit.window_label(), "30 minutes");
        rate_limit.window_seconds = 45;
        assert_eq!(rate_limit.window_label(), "45 seconds");
        assert_eq!(rate_limit.window_ms(), 45_000);
    }

    #[test]
    fn test_max_tokens_ceiling_is_twice_default() {
        let limits = RequestLimits::default();
        assert_eq!(limits.max_tokens_ceiling(), 4096);
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
server:
  bind_address: 0.0.0.0:8080
  allowed_origin: https://chat.example.com
upstream:
  base_url: http://localhost:9999/api/v1
rate_limit:
  chat_requests: 100
  window_seconds: 60
models:
  default_model: llama-3.3-70b
  max_output_price: 10.0
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(
            config.server.allowed_origin.as_deref(),
            Some("https://chat.example.com")
        );
        assert_eq!(config.upstream.base_url, "http://localhost:9999/api/v1");
        assert_eq!(config.rate_limit.chat_requests, 100);
        assert_eq!(config.rate_limit.image_requests, 5);
        assert_eq!(config.models.default_model, "llama-3.3-70b");
        assert_eq!(config.models.max_output_price, 10.0);
        assert_eq!(config.models.max_input_price, 2.0);
        assert_eq!(config.limits.max_message_length, 8000);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.rate_limit.chat_requests, 20);
        assert_eq!(config.models.image_models.len(), 4);
    }
}
