//! OpenAI-compatible chat completions provider
//!
//! Also serves OpenAI-compatible gateways (Yandex Cloud, proxies) through
//! [`OpenAIProvider::with_base_url`] and [`OpenAIProvider::with_provider_name`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ColloquyError, ProviderError, ProviderErrorKind, Result};
use crate::llm::{ChatRequest, LLMProvider, ModelInfo, ToolDescriptor};
use crate::message::{Message, ToolCall};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI LLM provider.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    provider_name: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "gpt-5", "gpt-5-mini")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_OPENAI_BASE_URL)
    }

    /// Create with a custom base URL (proxies or compatible APIs).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider_name: "openai".to_string(),
        }
    }

    /// Name reported in errors and [`ModelInfo`].
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `OPENAI_API_KEY` - API key (required)
    /// - `OPENAI_BASE_URL`, then `PROXY_URL` - Custom base URL (optional)
    ///
    /// # Errors
    ///
    /// Returns an error if OPENAI_API_KEY is not set.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ColloquyError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let base_url = std::env::var("OPENAI_BASE_URL")
            .or_else(|_| std::env::var("PROXY_URL"))
            .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());

        Ok(Self::with_base_url(api_key, model, base_url))
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAITool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAIToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

#[derive(Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAIFunction,
}

#[derive(Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

#[derive(Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

fn convert_messages(messages: &[Message]) -> Vec<OpenAIMessage> {
    messages
        .iter()
        .map(|m| match m {
            Message::System { content } => OpenAIMessage {
                role: "system",
                content: content.clone(),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
            Message::Human { content } => OpenAIMessage {
                role: "user",
                content: content.clone(),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
            Message::Ai {
                content,
                tool_calls,
            } => OpenAIMessage {
                role: "assistant",
                content: content.clone(),
                tool_calls: tool_calls
                    .iter()
                    .map(|c| OpenAIToolCall {
                        id: c.id.clone(),
                        call_type: function_type(),
                        function: OpenAIFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect(),
                tool_call_id: None,
            },
            Message::Tool {
                content,
                tool_call_id,
                ..
            } => OpenAIMessage {
                role: "tool",
                content: content.clone(),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_call_id.clone()),
            },
        })
        .collect()
}

fn convert_tools(tools: &[ToolDescriptor]) -> Vec<OpenAITool> {
    tools
        .iter()
        .map(|t| OpenAITool {
            tool_type: "function",
            function: OpenAIFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

fn convert_reply(message: OpenAIMessageResponse) -> Message {
    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|c| {
            // Arguments arrive as a JSON string; keep the raw text if it does not parse.
            let arguments = serde_json::from_str(&c.function.arguments)
                .unwrap_or(Value::String(c.function.arguments));
            ToolCall::new(c.id, c.function.name, arguments)
        })
        .collect();
    Message::ai_with_tool_calls(message.content.unwrap_or_default(), tool_calls)
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn invoke(&self, request: &ChatRequest) -> Result<Message> {
        let openai_request = OpenAIRequest {
            model: self.model.clone(),
            messages: convert_messages(&request.messages),
            tools: convert_tools(&request.tools),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.provider_name, &e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let message = match serde_json::from_str::<OpenAIError>(&text) {
                Ok(error) => match error.error.error_type {
                    Some(kind) => format!("{}: {}", kind, error.error.message),
                    None => error.error.message,
                },
                Err(_) => text,
            };

            return Err(ProviderError::from_status(&self.provider_name, status, message).into());
        }

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.provider_name, &e))?;

        let choice = openai_response.choices.into_iter().next().ok_or_else(|| {
            ProviderError::new(
                &self.provider_name,
                ProviderErrorKind::InvalidResponse,
                "API returned no choices",
            )
        })?;

        Ok(convert_reply(choice.message))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.provider_name.clone(),
            model_name: self.model.clone(),
        }
    }
}
