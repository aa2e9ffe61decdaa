//! Model worker abstraction and implementations
//!
//! Provides the ModelWorker trait and two implementations:
//! - EchoWorker: Testing/demo worker
//! - OpenAiWorker: OpenAI-compatible chat completions API
//!
//! A worker performs exactly one backend round trip per call. Retries,
//! rate limiting and caching all happen above this layer.
//!
//! ## Environment Variables
//!
//! - `OPENAI_API_KEY`: Required for [`OpenAiWorker::from_env`]
//! - `OPENAI_BASE_URL`: Optional API base URL (default: https://api.openai.com/v1)

use crate::routing::ModelDescriptor;
use crate::OrchestratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Trait for model inference workers
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via `Arc<dyn ModelWorker>`.
#[async_trait]
pub trait ModelWorker: Send + Sync {
    /// Generate a completion for `prompt` with the backend described by `model`.
    ///
    /// # Errors
    ///
    /// Any failure of the round trip is reported as
    /// [`OrchestratorError::Backend`] so that the retry executor treats it as
    /// transient.
    async fn generate(&self, model: &ModelDescriptor, prompt: &str)
        -> Result<String, OrchestratorError>;
}

// ============================================================================
// Echo Worker (Testing)
// ============================================================================

/// Dummy echo worker for testing
///
/// Returns the prompt's words, truncated to the model's `max_output_tokens`.
/// Useful for smoke tests and demos without a real backend.
#[derive(Debug, Clone)]
pub struct EchoWorker {
    /// Simulated inference delay
    pub delay_ms: u64,
}

impl EchoWorker {
    /// Create an echo worker with a 10 ms simulated delay.
    pub fn new() -> Self {
        Self { delay_ms: 10 }
    }

    /// Create an echo worker with a custom simulated delay.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Default for EchoWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelWorker for EchoWorker {
    async fn generate(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> Result<String, OrchestratorError> {
        // Simulate inference latency
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;

        let words: Vec<&str> = prompt
            .split_whitespace()
            .take(model.max_output_tokens as usize)
            .collect();

        Ok(words.join(" "))
    }
}

// ============================================================================
// OpenAI Worker
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat completions worker
///
/// The model identifier, temperature and token limit come from the
/// [`ModelDescriptor`] of each call, so one worker serves every tier.
///
/// ## Example
///
/// ```no_run
/// use tiered_prompt_orchestrator::OpenAiWorker;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), tiered_prompt_orchestrator::OrchestratorError> {
/// let worker = Arc::new(OpenAiWorker::from_env()?.with_timeout(Duration::from_secs(60)));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct OpenAiWorker {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiWorker {
    /// Create a worker with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Create a worker from `OPENAI_API_KEY` (and optionally `OPENAI_BASE_URL`).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            OrchestratorError::ConfigError("OPENAI_API_KEY environment variable not set".into())
        })?;

        let worker = Self::new(api_key);
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => worker.with_base_url(url),
            _ => worker,
        })
    }

    /// Override the API base URL (e.g. for a compatible proxy).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured API base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelWorker for OpenAiWorker {
    async fn generate(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> Result<String, OrchestratorError> {
        let request = ChatRequest {
            model: &model.identifier,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: model.max_output_tokens,
            temperature: model.temperature,
        };

        debug!(model = %model.identifier, prompt_len = prompt.len(), "openai request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestratorError::Backend(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Backend(format!(
                "OpenAI API error {status}: {error_text}"
            )));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Backend(format!("Failed to parse response: {e}")))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OrchestratorError::Backend("No choices in OpenAI response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Tier;

    fn descriptor(max_output_tokens: u32) -> ModelDescriptor {
        ModelDescriptor {
            identifier: "echo".into(),
            tier: Tier::Simple,
            temperature: 0.0,
            max_output_tokens,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_echo_worker() {
        let worker = EchoWorker::with_delay(1);
        let result = worker
            .generate(&descriptor(16), "hello   world")
            .await
            .expect("test: echo never fails");
        assert_eq!(result, "hello world");
    }

    #[tokio::test]
    async fn test_echo_worker_truncates_to_token_limit() {
        let worker = EchoWorker::with_delay(0);
        let result = worker
            .generate(&descriptor(2), "one two three four")
            .await
            .expect("test: echo never fails");
        assert_eq!(result, "one two");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let worker = OpenAiWorker::new("key").with_base_url("http://localhost:1234/v1/");
        assert_eq!(worker.base_url(), "http://localhost:1234/v1");
    }

    #[test]
    fn test_chat_request_wire_format() {
        let request = ChatRequest {
            model: "gpt-4o",
            messages: [ChatMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: 64,
            temperature: 0.5,
        };
        let json = serde_json::to_value(&request).unwrap_or_default();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert_eq!(json["max_tokens"], 64);
    }
}
