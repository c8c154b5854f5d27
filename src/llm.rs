//! Language-model abstraction and implementations.
//!
//! The pipeline treats the model as an opaque, failure-prone call:
//! messages in, text out. [`LanguageModel`] is that seam.
//!
//! - **[`OpenAiModel`]**: `POST {base_url}/chat/completions` against any
//!   OpenAI-compatible endpoint.
//! - **[`StubModel`]**: offline echo of the prompt; lets the whole
//!   pipeline run without network access.
//!
//! Use [`create_model`] to build the one named by the project config.
//!
//! No retries are attempted here. HTTP and network failures are returned
//! to the caller as-is, and callers that need a deadline beyond the
//! configured request timeout should wrap the call themselves.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::LlmConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A text-generating model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Short provider label for logs and run metadata.
    fn provider(&self) -> &str;

    /// Generate a reply. The returned text is the raw reply, unmodified.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

// ============ Stub Model ============

/// Echoes its input instead of calling a model.
pub struct StubModel;

#[async_trait]
impl LanguageModel for StubModel {
    fn provider(&self) -> &str {
        "stub"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        let joined = messages
            .iter()
            .map(|m| format!("[{}] {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(format!(
            "(STUB LLM OUTPUT)\nModel={} temp={}\n\n{}\n",
            model, temperature, joined
        ))
    }
}

// ============ OpenAI-compatible Model ============

/// Chat-completions client.
///
/// Requires `OPENAI_API_KEY`. `OPENAI_BASE_URL` overrides the configured
/// base URL and `OPENAI_ORG_ID` is sent when present.
pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl OpenAiModel {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not set or the HTTP client
    /// cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(k) if !k.trim().is_empty() => k,
            _ => bail!("Missing API key. Set OPENAI_API_KEY in your environment."),
        };

        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| config.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization: std::env::var("OPENAI_ORG_ID").ok(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        Ok(parse_chat_response(&json))
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
/// A response without content yields an empty string; the parser turns
/// that into a proper error later.
fn parse_chat_response(json: &serde_json::Value) -> String {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Create the [`LanguageModel`] named by `config.provider`.
///
/// | Config Value | Model |
/// |-------------|-------|
/// | `"openai"` | [`OpenAiModel`] |
/// | `"stub"` | [`StubModel`] |
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiModel::new(config)?)),
        "stub" => Ok(Box::new(StubModel)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
