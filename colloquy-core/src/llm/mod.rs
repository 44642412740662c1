//! Model provider abstraction
//!
//! Providers accept a [`ChatRequest`] (message list, optional tool
//! descriptors, sampling options) and return exactly one reply
//! [`Message`]. A reply may carry tool-call requests; running them is the
//! agent loop's job, not the provider's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;

/// Configuration for one-shot generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Temperature for generation (0.0-2.0, default: 0.0)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// System prompt for context
    pub system_prompt: Option<String>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
            system_prompt: None,
        }
    }
}

impl LLMConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Tool exposed to the model as an invocable capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object
    pub parameters: Value,
}

/// Request to a model provider
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Tools the model may request calls against
    pub tools: Vec<ToolDescriptor>,

    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Create a simple request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::human(prompt)])
    }

    /// Create a request with system prompt
    pub fn with_system_prompt(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Message::system(system_prompt),
            Message::human(user_prompt),
        ])
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Trait for model provider implementations.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send the request and return the single reply message.
    ///
    /// The reply is normally `Message::Ai`, possibly carrying tool calls.
    async fn invoke(&self, request: &ChatRequest) -> Result<Message>;

    /// Generate text for a single prompt.
    async fn generate(&self, prompt: &str, config: &LLMConfig) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &config.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::human(prompt));

        let mut request = ChatRequest::new(messages).with_temperature(config.temperature);
        request.max_tokens = config.max_tokens;

        let reply = self.invoke(&request).await?;
        Ok(reply.content().to_string())
    }

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Model information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// Default system prompt for [`call_llm`].
pub const DEFAULT_CALL_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// One-shot call: system prompt plus a single human message, returns the
/// reply text.
pub async fn call_llm(
    provider: &dyn LLMProvider,
    message: &str,
    system_prompt: Option<&str>,
) -> Result<String> {
    tracing::debug!(
        provider = %provider.model_info().provider,
        chars = message.len(),
        "Calling LLM"
    );
    let config = LLMConfig::new()
        .with_system_prompt(system_prompt.unwrap_or(DEFAULT_CALL_SYSTEM_PROMPT));
    provider.generate(message, &config).await
}

pub mod factory;
pub mod invoke;
pub mod providers;
pub mod retry;
pub mod scripted;

pub use factory::{LLMProviderFactory, ProviderKind};
pub use invoke::{AttemptRecord, InvokeContext, InvokeDiagnostics, invoke_with_diagnostics};
pub use retry::{RetryConfig, with_retry, with_retry_if};
pub use scripted::{ScriptedProvider, ScriptedReply};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_config() {
        let config = LLMConfig::new()
            .with_temperature(1.5)
            .with_max_tokens(1000)
            .with_system_prompt("You are helpful");

        assert_eq!(config.temperature, 1.5);
        assert_eq!(config.max_tokens, Some(1000));
        assert!(config.system_prompt.is_some());
    }

    #[test]
    fn test_temperature_clamping() {
        let config = LLMConfig::new().with_temperature(5.0);
        assert_eq!(config.temperature, 2.0);

        let config = LLMConfig::new().with_temperature(-1.0);
        assert_eq!(config.temperature, 0.0);
    }

    #[test]
    fn test_request_builders() {
        let request = ChatRequest::with_system_prompt("sys", "hi").with_temperature(0.2);
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[0].is_system());
        assert_eq!(request.temperature, Some(0.2));
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn test_call_llm_sends_system_and_human() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::text("pong")]);
        let reply = call_llm(&provider, "ping", Some("be terse")).await.unwrap();
        assert_eq!(reply, "pong");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].messages,
            vec![Message::system("be terse"), Message::human("ping")]
        );
    }
}
