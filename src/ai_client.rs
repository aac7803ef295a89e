//! Language model clients used for cluster labeling
//!
//! Two wire formats cover every supported backend: the Anthropic Messages API
//! and OpenAI-compatible chat completions (OpenAI, Groq, Ollama). Clients are
//! built once at startup and shared; calls take `&self` and only touch atomic
//! counters, so concurrent labeling needs no locking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::LlmError;
use crate::settings::{LlmBackend, LlmSettings};

/// Generation knobs sent with each request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl From<&LlmSettings> for GenerationParams {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
        }
    }
}

/// Cumulative token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub requests: u64,
}

#[derive(Debug, Default)]
struct UsageCounter {
    input: AtomicU64,
    output: AtomicU64,
    requests: AtomicU64,
}

impl UsageCounter {
    fn record(&self, input: u64, output: u64) {
        self.input.fetch_add(input, Ordering::Relaxed);
        self.output.fetch_add(output, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input.load(Ordering::Relaxed),
            output_tokens: self.output.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// A text-completion provider
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, for logs and health output
    fn model_name(&self) -> &str;

    /// Send one prompt, return the raw completion text
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError>;

    fn usage(&self) -> TokenUsage {
        TokenUsage::default()
    }
}

// ==================== Anthropic ====================

/// Anthropic API message format
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Anthropic API request format
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    messages: Vec<Message>,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    usage: UsageCounter,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, api_key: String, model: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            model,
            base_url,
            usage: UsageCounter::default(),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        // Track token usage
        if let Some(usage) = &api_response.usage {
            self.usage.record(usage.input_tokens, usage.output_tokens);
        }

        let text: String = api_response
            .content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }

    fn usage(&self) -> TokenUsage {
        self.usage.snapshot()
    }
}

// ==================== OpenAI-compatible chat completions ====================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    /// Groq reasoning models: keep thinking out of the answer
    #[serde(skip_serializing_if = "Option::is_none")]
    include_reasoning: Option<bool>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageContent,
}

#[derive(Deserialize)]
struct ChatMessageContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Client for any `/chat/completions` endpoint
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    include_reasoning: Option<bool>,
    usage: UsageCounter,
}

impl ChatCompletionsClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>, model: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            model,
            base_url,
            include_reasoning: None,
            usage: UsageCounter::default(),
        }
    }

    pub fn with_include_reasoning(mut self, include: bool) -> Self {
        self.include_reasoning = Some(include);
        self
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            include_reasoning: self.include_reasoning,
        };

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        // Track token usage
        if let Some(usage) = &api_response.usage {
            self.usage.record(usage.prompt_tokens, usage.completion_tokens);
        }

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn usage(&self) -> TokenUsage {
        self.usage.snapshot()
    }
}

/// Build the configured client. Fails only when a required API key is missing.
pub fn from_settings(settings: &LlmSettings) -> Result<Arc<dyn LlmClient>, LlmError> {
    let http = reqwest::Client::new();
    let model = settings.model().to_string();
    let base_url = settings.base_url().to_string();
    let api_key = settings.api_key();

    if let Some(var) = settings.backend.api_key_env() {
        if api_key.is_none() {
            return Err(LlmError::MissingApiKey(var));
        }
    }

    info!("LLM backend: {:?}, model: {}", settings.backend, model);
    debug!("LLM base URL: {}", base_url);

    let client: Arc<dyn LlmClient> = match settings.backend {
        LlmBackend::Anthropic => Arc::new(AnthropicClient::new(
            http,
            api_key.unwrap_or_default(),
            model,
            base_url,
        )),
        LlmBackend::Groq => Arc::new(
            ChatCompletionsClient::new(http, api_key, model, base_url).with_include_reasoning(false),
        ),
        LlmBackend::OpenAi | LlmBackend::Ollama => {
            Arc::new(ChatCompletionsClient::new(http, api_key, model, base_url))
        }
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "qwen/qwen3-32b",
            messages: vec![ChatMessage { role: "user", content: "hi" }],
            temperature: 0.0,
            top_p: 0.95,
            max_tokens: 64,
            include_reasoning: Some(false),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "qwen/qwen3-32b");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert_eq!(json["include_reasoning"], false);

        let plain = ChatRequest { include_reasoning: None, ..request };
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json.get("include_reasoning").is_none());
    }

    #[test]
    fn test_chat_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Neural Networks"}}],
                       "usage":{"prompt_tokens":120,"completion_tokens":4,"total_tokens":124}}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Neural Networks"));
        assert_eq!(parsed.usage.unwrap().completion_tokens, 4);
    }

    #[test]
    fn test_anthropic_response_parsing() {
        let body = r#"{"content":[{"type":"text","text":"Deep Learning"}],
                       "usage":{"input_tokens":50,"output_tokens":3}}"#;
        let parsed: AnthropicResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.content[0].text, "Deep Learning");
        assert_eq!(parsed.usage.unwrap().input_tokens, 50);
    }

    #[test]
    fn test_usage_counter() {
        let counter = UsageCounter::default();
        counter.record(10, 2);
        counter.record(5, 1);
        assert_eq!(
            counter.snapshot(),
            TokenUsage { input_tokens: 15, output_tokens: 3, requests: 2 }
        );
    }

    #[test]
    fn test_from_settings_ollama_needs_no_key() {
        let settings = LlmSettings {
            backend: LlmBackend::Ollama,
            ..Default::default()
        };
        let client = from_settings(&settings).unwrap();
        assert_eq!(client.model_name(), "qwen2.5:7b");
        assert_eq!(client.usage(), TokenUsage::default());
    }

    #[test]
    fn test_generation_params_from_settings() {
        let settings = LlmSettings::default();
        let params = GenerationParams::from(&settings);
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.top_p, 0.95);
        assert_eq!(params.max_tokens, 1024);
    }
}
