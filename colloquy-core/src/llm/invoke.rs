//! Model invocation with backoff and failure diagnostics
//!
//! Wraps a single provider call (the CALL_MODEL step of a turn) in the
//! retry policy. Each failed attempt is recorded; when the call finally
//! fails the error carries the session identity, the attempt history and
//! message-size statistics so operators can tell configuration, provider
//! and payload-size causes apart without replaying the request.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::Instrument;

use crate::error::{ColloquyError, ProviderErrorKind, Result};
use crate::llm::{ChatRequest, LLMProvider, RetryConfig, with_retry_if};
use crate::message::{Message, MessagesSize};

/// Identity of the dialog issuing the call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvokeContext {
    pub session_id: String,
    pub dialog_code: String,
    pub alias: String,
}

impl InvokeContext {
    pub fn new(
        session_id: impl Into<String>,
        dialog_code: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            dialog_code: dialog_code.into(),
            alias: alias.into(),
        }
    }
}

/// One failed attempt
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    /// 1-indexed attempt number
    pub attempt: usize,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub messages_count: usize,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProviderErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub is_timeout: bool,
    pub is_network: bool,
    pub is_connection: bool,
    pub retryable: bool,
}

impl AttemptRecord {
    fn from_error(
        attempt: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
        messages_count: usize,
        error: &ColloquyError,
    ) -> Self {
        let provider = error.as_provider();
        Self {
            attempt,
            duration_ms,
            timestamp,
            messages_count,
            error_message: error.to_string(),
            error_kind: provider.map(|p| p.kind),
            status: provider.and_then(|p| p.status),
            is_timeout: provider.is_some_and(|p| p.is_timeout()),
            is_network: provider.is_some_and(|p| p.is_network()),
            is_connection: provider.is_some_and(|p| p.is_connection()),
            retryable: error.is_retryable(),
        }
    }
}

/// Everything known about a model call that could not be completed
#[derive(Debug, Clone, Serialize)]
pub struct InvokeDiagnostics {
    #[serde(flatten)]
    pub context: InvokeContext,
    pub provider: String,
    pub model: String,
    pub total_duration_ms: u64,
    pub messages_stats: MessagesSize,
    pub attempts: Vec<AttemptRecord>,
    pub last_error: String,
    /// Whether a proxy endpoint was configured through `PROXY_URL`
    pub proxy_configured: bool,
}

impl InvokeDiagnostics {
    /// Kind of the final provider failure, if it was a provider error
    pub fn last_error_kind(&self) -> Option<ProviderErrorKind> {
        self.attempts.last().and_then(|a| a.error_kind)
    }
}

impl std::fmt::Display for InvokeDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "LLM invoke failed after {} attempts", self.attempts.len())?;
        writeln!(f, "Session: {}", self.context.session_id)?;
        writeln!(f, "Dialog: {} ({})", self.context.dialog_code, self.context.alias)?;
        writeln!(f, "Total duration: {}ms", self.total_duration_ms)?;
        writeln!(
            f,
            "Messages: {} chars ({}), {} messages",
            self.messages_stats.total_chars,
            self.messages_stats.human_readable,
            self.messages_stats.messages_count
        )?;
        let json = serde_json::to_string(self).unwrap_or_default();
        write!(f, "Diagnostic info: {}", json)
    }
}

/// Call `provider` with backoff, collecting diagnostics on failure.
///
/// Retryable provider errors are retried per `retry`; any other error ends
/// the call immediately. Either way the final error is
/// [`ColloquyError::InvokeFailed`].
pub async fn invoke_with_diagnostics(
    ctx: &InvokeContext,
    provider: &dyn LLMProvider,
    request: &ChatRequest,
    retry: &RetryConfig,
) -> Result<Message> {
    let info = provider.model_info();
    let attempts: Mutex<Vec<AttemptRecord>> = Mutex::new(Vec::new());
    let span = tracing::info_span!(
        "invoke",
        session_id = %ctx.session_id,
        model = %info.model_name
    );

    let recorder = &attempts;
    let result = with_retry_if(retry, ColloquyError::is_retryable, move || async move {
        let attempt = recorder.lock().await.len() + 1;
        tracing::debug!(
            attempt = attempt,
            max_attempts = retry.max_attempts,
            messages = request.messages.len(),
            "Invoking model"
        );

        let timestamp = Utc::now();
        let started = Instant::now();
        let result = provider.invoke(request).await;
        if let Err(error) = &result {
            recorder.lock().await.push(AttemptRecord::from_error(
                attempt,
                started.elapsed().as_millis() as u64,
                timestamp,
                request.messages.len(),
                error,
            ));
        }
        result
    })
    .instrument(span)
    .await;

    let error = match result {
        Ok(reply) => return Ok(reply),
        Err(error) => error,
    };

    let attempts = attempts.into_inner();
    let diagnostics = InvokeDiagnostics {
        context: ctx.clone(),
        provider: info.provider.clone(),
        model: info.model_name.clone(),
        total_duration_ms: attempts.iter().map(|a| a.duration_ms).sum(),
        messages_stats: MessagesSize::of(&request.messages),
        attempts,
        last_error: error.to_string(),
        proxy_configured: std::env::var("PROXY_URL").is_ok(),
    };

    tracing::error!(
        session_id = %ctx.session_id,
        dialog_code = %ctx.dialog_code,
        attempts = diagnostics.attempts.len(),
        total_duration_ms = diagnostics.total_duration_ms,
        messages_chars = diagnostics.messages_stats.total_chars,
        error = %error,
        "Model invoke failed"
    );

    Err(ColloquyError::InvokeFailed(Box::new(diagnostics)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedProvider, ScriptedReply};
    use std::time::Duration;

    fn ctx() -> InvokeContext {
        InvokeContext::new("demo::42", "demo", "Bot")
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried_with_backoff() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::transient("overloaded"),
            ScriptedReply::timeout(),
            ScriptedReply::text("finally"),
        ]);
        let started = tokio::time::Instant::now();

        let reply = invoke_with_diagnostics(
            &ctx(),
            &provider,
            &ChatRequest::from_prompt("hi"),
            &RetryConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(reply.content(), "finally");
        assert_eq!(provider.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_produces_diagnostics() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::transient("a"),
            ScriptedReply::transient("b"),
            ScriptedReply::transient("c"),
            ScriptedReply::text("never reached"),
        ]);
        let request = ChatRequest::new(vec![Message::system("sys"), Message::human("hello")]);

        let err = invoke_with_diagnostics(&ctx(), &provider, &request, &RetryConfig::default())
            .await
            .unwrap_err();

        assert_eq!(provider.calls(), 3);
        let ColloquyError::InvokeFailed(diagnostics) = err else {
            panic!("expected InvokeFailed");
        };
        assert_eq!(diagnostics.context.session_id, "demo::42");
        assert_eq!(
            diagnostics.attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(diagnostics.attempts[2].status, Some(503));
        assert_eq!(diagnostics.messages_stats.total_chars, 8);
        assert_eq!(diagnostics.last_error_kind(), Some(ProviderErrorKind::Server));

        let text = diagnostics.to_string();
        assert!(text.starts_with("LLM invoke failed after 3 attempts"));
        assert!(text.contains("Dialog: demo (Bot)"));
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::fatal("bad request"),
            ScriptedReply::text("unused"),
        ]);

        let err = invoke_with_diagnostics(
            &ctx(),
            &provider,
            &ChatRequest::from_prompt("hi"),
            &RetryConfig::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(provider.calls(), 1);
        assert!(matches!(err, ColloquyError::InvokeFailed(d) if !d.attempts[0].retryable));
    }
}
