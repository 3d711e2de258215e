//! Chat-completion client abstraction.
//!
//! Defines the [`ChatModel`] trait and two implementations:
//! - **[`DisabledChat`]**: always fails; used when `llm.provider = "disabled"`.
//! - **[`OpenAiChat`]**: calls an OpenAI-compatible `/chat/completions`
//!   endpoint, including vision requests for image alt text.
//!
//! # Retry Strategy
//!
//! A single call is retried with exponential backoff on transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Batch commands do not retry beyond this; a failed item is counted and
//! the batch moves on.

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::config::LlmConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM provider is disabled. Set [llm] provider in config.")]
    Disabled,
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("LLM API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("LLM request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed LLM response: {0}")]
    MalformedResponse(String),
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: &'static str,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    /// Ask the provider for a JSON object reply.
    Json,
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Send a conversation and return the assistant's reply text.
    async fn complete(&self, messages: &[Message], format: ResponseFormat) -> Result<String, LlmError>;

    /// Ask a vision-capable model about an image. `image` is an http(s)
    /// URL, a `data:` URL, or a local file path.
    async fn describe_image(&self, image: &str, prompt: &str) -> Result<String, LlmError>;
}

// ============ Disabled ============

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[Message], _format: ResponseFormat) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }

    async fn describe_image(&self, _image: &str, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    vision_model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiChat {
    /// Build a client using `OPENAI_API_KEY` from the environment.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| LlmError::MalformedResponse("llm.model is not configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            vision_model: config.vision_model.clone().unwrap_or_else(|| model.clone()),
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn post(&self, body: &Value) -> Result<Value, LlmError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json::<Value>().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = LlmError::Http {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(attempt, status = status.as_u16(), "retrying LLM call");
                        last_err = Some(err);
                        continue;
                    }

                    // Client error (not 429): no retry
                    return Err(err);
                }
                Err(e) => {
                    tracing::debug!(attempt, "LLM network error: {}", e);
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::MalformedResponse("no attempts made".into())))
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], format: ResponseFormat) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if format == ResponseFormat::Json {
            body["response_format"] = json!({ "type": "json_object" });
        }
        let reply = self.post(&body).await?;
        parse_chat_response(&reply)
    }

    async fn describe_image(&self, image: &str, prompt: &str) -> Result<String, LlmError> {
        let image_url = image_to_url(image)?;
        let body = json!({
            "model": self.vision_model,
            "temperature": self.temperature,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ],
            }],
        });
        let reply = self.post(&body).await?;
        parse_chat_response(&reply)
    }
}

/// Extract `choices[0].message.content`.
pub fn parse_chat_response(json: &Value) -> Result<String, LlmError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| LlmError::MalformedResponse("missing choices[0].message.content".into()))
}

/// Remote and `data:` URLs pass through; local files become `data:` URLs.
pub fn image_to_url(image: &str) -> Result<String, LlmError> {
    if image.starts_with("http://") || image.starts_with("https://") || image.starts_with("data:") {
        return Ok(image.to_string());
    }
    let path = Path::new(image);
    let bytes = std::fs::read(path)?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", mime, encoded))
}

/// Parse a JSON reply, tolerating a surrounding ```json fence or prose
/// before the first `{`/`[`.
pub fn parse_json_reply(text: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    if let Ok(v) = serde_json::from_str(unfenced) {
        return Ok(v);
    }

    // Fall back to the outermost object or array in the text
    let start = unfenced.find(['{', '[']);
    let end = unfenced.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e > s => serde_json::from_str(&unfenced[s..=e])
            .map_err(|err| LlmError::MalformedResponse(format!("invalid JSON reply: {}", err))),
        _ => Err(LlmError::MalformedResponse("reply contains no JSON".into())),
    }
}

/// Create the configured [`ChatModel`].
pub fn create_chat_model(config: &LlmConfig) -> anyhow::Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChat)),
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}
