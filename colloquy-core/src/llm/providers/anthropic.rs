//! Anthropic (Claude) messages API provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ColloquyError, ProviderError, ProviderErrorKind, Result};
use crate::llm::{ChatRequest, LLMProvider, ModelInfo, ToolDescriptor};
use crate::message::{Message, ToolCall, wrap_instruction};

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

/// `max_tokens` is mandatory on this API
const DEFAULT_MAX_TOKENS: usize = 4096;

/// Anthropic (Claude) LLM provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g., "claude-sonnet-4-5")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_ANTHROPIC_BASE_URL)
    }

    /// Create with a custom base URL.
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
        }
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `ANTHROPIC_API_KEY` - API key (required)
    /// - `ANTHROPIC_BASE_URL`, then `PROXY_URL` - Custom base URL (optional)
    ///
    /// # Errors
    ///
    /// Returns an error if ANTHROPIC_API_KEY is not set.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ColloquyError::Configuration(
                "ANTHROPIC_API_KEY environment variable not set".to_string(),
            )
        })?;

        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .or_else(|_| std::env::var("PROXY_URL"))
            .unwrap_or_else(|_| DEFAULT_ANTHROPIC_BASE_URL.to_string());

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

/// Anthropic API request format
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

/// Anthropic API response format
#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

/// Anthropic error response
#[derive(Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Convert messages to Anthropic format.
///
/// Leading system messages become the `system` field. System messages after
/// the first non-system message are sent as wrapped user instructions, since
/// the API only accepts a system prompt up front. Consecutive blocks with the
/// same role are merged into one message; tool results travel as user blocks.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_parts = Vec::new();
    let mut converted: Vec<AnthropicMessage> = Vec::new();

    for msg in messages {
        let (role, block) = match msg {
            Message::System { content } if converted.is_empty() => {
                system_parts.push(content.clone());
                continue;
            }
            Message::System { content } => (
                "user",
                ContentBlock::Text {
                    text: wrap_instruction(content),
                },
            ),
            Message::Human { content } => (
                "user",
                ContentBlock::Text {
                    text: content.clone(),
                },
            ),
            Message::Ai {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if !content.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: content.clone(),
                    });
                }
                blocks.extend(tool_calls.iter().map(|c| ContentBlock::ToolUse {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    input: c.arguments.clone(),
                }));
                push_blocks(&mut converted, "assistant", blocks);
                continue;
            }
            Message::Tool {
                content,
                tool_call_id,
                is_error,
                ..
            } => (
                "user",
                ContentBlock::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                },
            ),
        };
        push_blocks(&mut converted, role, vec![block]);
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, converted)
}

fn push_blocks(messages: &mut Vec<AnthropicMessage>, role: &'static str, blocks: Vec<ContentBlock>) {
    if blocks.is_empty() {
        return;
    }
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.extend(blocks),
        _ => messages.push(AnthropicMessage {
            role,
            content: blocks,
        }),
    }
}

fn convert_tools(tools: &[ToolDescriptor]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.parameters.clone(),
        })
        .collect()
}

fn convert_reply(blocks: Vec<ContentBlock>) -> Message {
    let mut text = String::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => calls.push(ToolCall::new(id, name, input)),
            _ => {}
        }
    }
    Message::ai_with_tool_calls(text, calls)
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn invoke(&self, request: &ChatRequest) -> Result<Message> {
        let (system, messages) = convert_messages(&request.messages);

        let anthropic_request = AnthropicRequest {
            model: self.model.clone(),
            messages,
            system,
            tools: convert_tools(&request.tools),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature,
        };

        let url = format!("{}/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&anthropic_request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest("anthropic", &e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let message = match serde_json::from_str::<AnthropicError>(&text) {
                Ok(error) => format!("{}: {}", error.error.error_type, error.error.message),
                Err(_) => text,
            };

            return Err(ProviderError::from_status("anthropic", status, message).into());
        }

        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest("anthropic", &e))?;

        if anthropic_response.content.is_empty() {
            return Err(ProviderError::new(
                "anthropic",
                ProviderErrorKind::InvalidResponse,
                "API returned no content blocks",
            )
            .into());
        }

        Ok(convert_reply(anthropic_response.content))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "anthropic".to_string(),
            model_name: self.model.clone(),
        }
    }
}
