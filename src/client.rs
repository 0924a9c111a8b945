//! HTTP client for a running OpenChat proxy
//!
//! Used by the command-line commands and the scheduled prompt. Chat replies
//! are streamed through [`parse_streaming_response`]; the other endpoints
//! return small JSON payloads.

use crate::config::ClientConfig;
use crate::error::{OpenChatError, Result};
use crate::server::guards::{PASSWORD_HEADER, TOS_HEADER};
use crate::streaming::{parse_streaming_response, StreamingCallbacks, StreamingResult};
use crate::types::ChatMessage;
use crate::validation::parse_data_url;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A chat turn to send to `/api/chat`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingChat {
    /// Model id
    pub model: String,
    /// Context messages, oldest first, ending with the new user message
    pub messages: Vec<ChatMessage>,
    /// Let the provider search the web
    pub web_search: bool,
    /// Optional image attached to the last user message
    pub image_data_url: Option<String>,
    /// Optional custom system prompt
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    enable_web_search: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_data_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
}

impl<'a> From<&'a OutgoingChat> for ChatBody<'a> {
    fn from(chat: &'a OutgoingChat) -> Self {
        Self {
            model: &chat.model,
            messages: &chat.messages,
            stream: true,
            enable_web_search: if chat.web_search { "auto" } else { "off" },
            image_data_url: chat.image_data_url.as_deref(),
            system_prompt: chat
                .system_prompt
                .as_deref()
                .filter(|p| !p.trim().is_empty()),
        }
    }
}

/// Image returned by `/api/image` or `/api/upscale`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedImage {
    /// `data:<mime>;base64,...`
    pub image_data_url: String,
    /// MIME type of the image
    pub mime: String,
}

impl GeneratedImage {
    /// Decode the image payload
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Validation` if the data URL is malformed.
    pub fn decode(&self) -> Result<Vec<u8>> {
        decode_data_url(&self.image_data_url).map(|(_, bytes)| bytes)
    }
}

/// Client for the proxy's `/api` routes
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    deployment_password: Option<String>,
}

impl ChatClient {
    /// Create a client for the configured proxy
    ///
    /// # Arguments
    ///
    /// * `config` - Client configuration (proxy URL and request timeout)
    /// * `deployment_password` - Sent as `X-Deployment-Password` when non-empty
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Config` if the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```
    /// use openchat::client::ChatClient;
    /// use openchat::config::ClientConfig;
    ///
    /// let client = ChatClient::new(&ClientConfig::default(), None).unwrap();
    /// assert_eq!(client.base_url(), "http://127.0.0.1:3000");
    /// ```
    pub fn new(config: &ClientConfig, deployment_password: Option<String>) -> Result<Self> {
        // No client-wide timeout: it would also bound streamed replies.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("openchat-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OpenChatError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_seconds),
            deployment_password: deployment_password.filter(|p| !p.is_empty()),
        })
    }

    /// Proxy base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header(TOS_HEADER, "true");
        if let Some(password) = &self.deployment_password {
            request = request.header(PASSWORD_HEADER, password);
        }
        request
    }

    /// Send a chat turn and stream the reply
    ///
    /// The request and the whole stream share one deadline of
    /// `client.timeout_seconds`. Reaching it stops the stream the same way
    /// cancelling does.
    ///
    /// # Arguments
    ///
    /// * `chat` - Model, context messages and options
    /// * `callbacks` - Receives cumulative content and citation updates
    /// * `cancel` - Optional token; cancelling keeps the partial reply
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::RequestFailed` when the proxy answers with a
    /// non-success status, or a transport or stream error.
    pub async fn send_chat<C>(
        &self,
        chat: &OutgoingChat,
        callbacks: &mut C,
        cancel: Option<&CancellationToken>,
    ) -> Result<StreamingResult>
    where
        C: StreamingCallbacks + ?Sized,
    {
        let deadline = cancel
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let timer = {
            let deadline = deadline.clone();
            let limit = self.timeout;
            tokio::spawn(async move {
                if tokio::time::timeout(limit, deadline.cancelled()).await.is_err() {
                    tracing::warn!("Chat reply exceeded {:?}; stopping stream", limit);
                    deadline.cancel();
                }
            })
        };

        let outcome = self.stream_chat(chat, callbacks, &deadline).await;
        timer.abort();
        outcome
    }

    async fn stream_chat<C>(
        &self,
        chat: &OutgoingChat,
        callbacks: &mut C,
        cancel: &CancellationToken,
    ) -> Result<StreamingResult>
    where
        C: StreamingCallbacks + ?Sized,
    {
        tracing::debug!(
            "Sending chat: model={}, {} messages, web_search={}",
            chat.model,
            chat.messages.len(),
            chat.web_search
        );

        let request = self.post("/api/chat").json(&ChatBody::from(chat)).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(StreamingResult {
                    aborted: true,
                    ..Default::default()
                });
            }
            response = request => response?,
        };

        let response = ensure_success(response).await?;
        parse_streaming_response(response.bytes_stream(), callbacks, Some(cancel)).await
    }

    /// Fetch `/api/info`
    pub async fn info(&self) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/api/info", self.base_url))
            .timeout(self.timeout)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Generate an image
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::RequestFailed` for a rejected request.
    pub async fn generate_image(
        &self,
        prompt: &str,
        model: Option<&str>,
        size: &str,
        format: &str,
    ) -> Result<GeneratedImage> {
        let mut body = serde_json::json!({
            "prompt": prompt,
            "size": size,
            "format": format,
        });
        if let Some(model) = model {
            body["model"] = Value::from(model);
        }

        let response = self
            .post("/api/image")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Upscale an image given as a data URL
    pub async fn upscale(
        &self,
        image_data_url: &str,
        scale: f64,
        enhance: bool,
    ) -> Result<GeneratedImage> {
        let body = serde_json::json!({
            "image_data_url": image_data_url,
            "scale": scale,
            "enhance": enhance,
        });

        let response = self
            .post("/api/upscale")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!("OpenChat proxy returned {}: {}", status.as_u16(), body);
    Err(OpenChatError::RequestFailed {
        status: status.as_u16(),
        body,
    }
    .into())
}

/// Guess an image MIME type from a file extension
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Encode bytes as a base64 data URL
///
/// # Examples
///
/// ```
/// use openchat::client::encode_data_url;
///
/// assert_eq!(encode_data_url(b"hi", "image/png"), "data:image/png;base64,aGk=");
/// ```
pub fn encode_data_url(bytes: &[u8], mime: &str) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Decode a base64 data URL into its MIME type and bytes
///
/// # Errors
///
/// Returns `OpenChatError::Validation` for a value that is not a base64 data
/// URL or whose payload does not decode.
pub fn decode_data_url(value: &str) -> Result<(String, Vec<u8>)> {
    let parsed = parse_data_url(value)
        .ok_or_else(|| OpenChatError::Validation("Invalid image data URL".to_string()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(parsed.data.trim())
        .map_err(|e| OpenChatError::Validation(format!("Invalid image data: {}", e)))?;
    Ok((parsed.mime.to_string(), bytes))
}

/// Read an image file into a data URL
///
/// # Errors
///
/// Returns `OpenChatError::Validation` for an unsupported extension and
/// `OpenChatError::Io` if the file cannot be read.
pub fn load_image_file(path: &Path) -> Result<(String, Vec<u8>)> {
    let mime = mime_for_path(path).ok_or_else(|| {
        OpenChatError::Validation(format!(
            "Unsupported image type: {} (expected png, jpeg or webp)",
            path.display()
        ))
    })?;
    let bytes = std::fs::read(path).map_err(OpenChatError::Io)?;
    Ok((mime.to_string(), bytes))
}
