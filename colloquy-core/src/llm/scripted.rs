//! Deterministic provider driven by a script of replies.
//!
//! Used for offline tests of the dialog engine. Each `invoke` pops the next
//! scripted reply; once the script is exhausted the provider echoes the last
//! human message. Every request is recorded for later inspection.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{ProviderError, ProviderErrorKind, Result};
use crate::llm::{ChatRequest, LLMProvider, ModelInfo};
use crate::message::{Message, ToolCall};

/// What a scripted step produces
#[derive(Debug, Clone)]
pub enum ScriptedReplyKind {
    /// Plain AI message
    Text(String),
    /// AI message requesting tool calls
    ToolCalls {
        content: String,
        calls: Vec<ToolCall>,
    },
    /// Provider failure
    Error(ProviderError),
}

/// One scripted step with optional delay
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub delay: Duration,
    pub kind: ScriptedReplyKind,
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            kind: ScriptedReplyKind::Text(content.into()),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::tool_calls(vec![ToolCall::new(id, name, arguments)])
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            delay: Duration::ZERO,
            kind: ScriptedReplyKind::ToolCalls {
                content: String::new(),
                calls,
            },
        }
    }

    pub fn error(error: ProviderError) -> Self {
        Self {
            delay: Duration::ZERO,
            kind: ScriptedReplyKind::Error(error),
        }
    }

    /// Retryable 503 from the provider
    pub fn transient(message: impl Into<String>) -> Self {
        Self::error(ProviderError::from_status("scripted", 503, message))
    }

    /// Non-retryable 400 from the provider
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::error(ProviderError::from_status("scripted", 400, message))
    }

    pub fn timeout() -> Self {
        Self::error(ProviderError::new(
            "scripted",
            ProviderErrorKind::Timeout,
            "request timed out",
        ))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Scripted provider for tests
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    model: String,
    script: Arc<Mutex<VecDeque<ScriptedReply>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptedReply>) -> Self {
        Self {
            model: "scripted".to_string(),
            script: Arc::new(Mutex::new(VecDeque::from(steps))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn push(&self, step: ScriptedReply) {
        lock(&self.script).push_back(step);
    }

    /// Number of `invoke` calls so far
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }

    fn echo(request: &ChatRequest) -> Message {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.is_human())
            .map(|m| format!("scripted-echo: {}", m.content()))
            .unwrap_or_else(|| "scripted-ok".to_string());
        Message::ai(text)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn invoke(&self, request: &ChatRequest) -> Result<Message> {
        lock(&self.requests).push(request.clone());
        let step = lock(&self.script).pop_front();

        let Some(step) = step else {
            return Ok(Self::echo(request));
        };

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        match step.kind {
            ScriptedReplyKind::Text(content) => Ok(Message::ai(content)),
            ScriptedReplyKind::ToolCalls { content, calls } => {
                Ok(Message::ai_with_tool_calls(content, calls))
            }
            ScriptedReplyKind::Error(error) => Err(error.into()),
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model_name: self.model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_order_and_echo() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::tool_call("c1", "lookup", json!({"q": 1})),
            ScriptedReply::text("done"),
        ]);
        let request = ChatRequest::from_prompt("hello");

        let first = provider.invoke(&request).await.unwrap();
        assert_eq!(first.tool_calls().len(), 1);

        let second = provider.invoke(&request).await.unwrap();
        assert_eq!(second.content(), "done");

        let third = provider.invoke(&request).await.unwrap();
        assert_eq!(third.content(), "scripted-echo: hello");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::transient("overloaded")]);
        let err = provider
            .invoke(&ChatRequest::from_prompt("x"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
