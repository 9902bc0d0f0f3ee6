//! LLM client.
//!
//! The model is an opaque text-completion service. [`ChatCompletionsClient`]
//! speaks the chat-completions protocol to Azure OpenAI or any
//! OpenAI-compatible endpoint; [`UnconfiguredLlm`] stands in when no endpoint
//! or key is set so the service still starts and answers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use costlens_core::config::{LlmConfig, LlmProvider};

use crate::prompt::Prompt;

/// Why an LLM call produced no text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("llm unavailable: {0}")]
    Unavailable(String),
    #[error("llm request timed out")]
    Timeout,
}

/// An opaque text generator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a reply to `prompt`, giving up after `timeout`.
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> Result<String, LlmError>;

    /// Whether the client can reach a real model.
    fn is_configured(&self) -> bool {
        true
    }
}

// =============================================================================
// Chat completions
// =============================================================================

#[derive(Debug, Clone)]
enum Auth {
    /// Azure `api-key` header.
    ApiKey(String),
    Bearer(String),
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for Azure OpenAI and OpenAI-compatible chat-completions APIs.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    url: String,
    auth: Auth,
    /// Sent as `model` for OpenAI-compatible providers.
    model: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsClient {
    /// Build a client from configuration. Fails when endpoint or key is missing.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::Unavailable("llm endpoint not configured".to_string()))?;
        let key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::Unavailable("llm api key not configured".to_string()))?;
        let base = endpoint.trim_end_matches('/');

        let (url, auth, model) = match config.provider {
            LlmProvider::Azure => (
                format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    base, config.deployment, config.api_version
                ),
                Auth::ApiKey(key.to_string()),
                None,
            ),
            LlmProvider::OpenAi => (
                format!("{}/chat/completions", base),
                Auth::Bearer(key.to_string()),
                Some(config.deployment.clone()),
            ),
        };

        Ok(Self {
            client: Client::new(),
            url,
            auth,
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_body(&self, prompt: &Prompt) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": prompt.messages(),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if let Some(model) = &self.model {
            body["model"] = serde_json::Value::String(model.clone());
        }
        body
    }
}

fn parse_completion(body: CompletionResponse) -> Result<String, LlmError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| LlmError::Unavailable("empty completion".to_string()))
}

fn classify_transport(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> Result<String, LlmError> {
        let request = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&self.request_body(prompt));
        let request = match &self.auth {
            Auth::ApiKey(key) => request.header("api-key", key),
            Auth::Bearer(key) => request.bearer_auth(key),
        };

        let resp = request.send().await.map_err(classify_transport)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, body_len = body.len(), "LLM endpoint returned an error");
            debug!(body = %body, "LLM error body");
            return Err(LlmError::Unavailable(format!("llm endpoint returned {}", status)));
        }

        let parsed: CompletionResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Unavailable(format!("malformed completion: {}", e))
            }
        })?;
        parse_completion(parsed)
    }
}

// =============================================================================
// Fallbacks
// =============================================================================

/// Stand-in used when no endpoint or key is configured.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredLlm;

#[async_trait]
impl LlmClient for UnconfiguredLlm {
    async fn generate(&self, _prompt: &Prompt, _timeout: Duration) -> Result<String, LlmError> {
        Err(LlmError::Unavailable(
            "llm endpoint or api key not configured".to_string(),
        ))
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Pick the client implied by `config`.
pub fn client_from_config(config: &LlmConfig) -> Arc<dyn LlmClient> {
    match ChatCompletionsClient::new(config) {
        Ok(client) => {
            debug!(provider = ?config.provider, "LLM client configured");
            Arc::new(client)
        }
        Err(e) => {
            warn!("{}; assistant will answer with an unavailable notice", e);
            Arc::new(UnconfiguredLlm)
        }
    }
}
