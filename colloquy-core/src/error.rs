//! Error types for Colloquy operations

use serde::Serialize;

use crate::llm::InvokeDiagnostics;
use crate::tools::ToolError;

/// Result type for Colloquy operations
pub type Result<T> = std::result::Result<T, ColloquyError>;

/// Error types for the dialog engine
#[derive(Debug, thiserror::Error)]
pub enum ColloquyError {
    /// Model provider call failed (network, timeout, rate limit, bad response)
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(#[from] ToolError),

    /// Session blob or history store I/O failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Missing credentials or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider retries exhausted, with diagnostics attached
    #[error("{0}")]
    InvokeFailed(Box<InvokeDiagnostics>),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ColloquyError {
    /// Whether the outer backoff wrapper should try the call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ColloquyError::Provider(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Underlying provider error, if any.
    pub fn as_provider(&self) -> Option<&ProviderError> {
        match self {
            ColloquyError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<String> for ColloquyError {
    fn from(s: String) -> Self {
        ColloquyError::Other(s)
    }
}

impl From<&str> for ColloquyError {
    fn from(s: &str) -> Self {
        ColloquyError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for ColloquyError {
    fn from(err: anyhow::Error) -> Self {
        ColloquyError::Other(err.to_string())
    }
}

/// Classification of a failed model call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Request timed out
    Timeout,
    /// DNS failure, refused or reset connection
    Network,
    /// Connection dropped mid-request
    Connection,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    Server,
    /// HTTP 4xx other than 429
    Client,
    /// Response body could not be interpreted
    InvalidResponse,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Connection => "connection",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Server => "server",
            ProviderErrorKind::Client => "client",
            ProviderErrorKind::InvalidResponse => "invalid_response",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a model provider client
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider} {kind}{}: {message}", fmt_status(.status))]
pub struct ProviderError {
    /// Provider name (e.g. "openai")
    pub provider: String,
    /// Error class
    pub kind: ProviderErrorKind,
    /// HTTP status code, when the server answered
    pub status: Option<u16>,
    /// Human-readable message
    pub message: String,
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Build from a non-success HTTP status and the response body.
    pub fn from_status(provider: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            429 => ProviderErrorKind::RateLimited,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::Client,
        };
        Self::new(provider, kind, body).with_status(status)
    }

    /// Build from a transport-level reqwest failure.
    pub fn from_reqwest(provider: impl Into<String>, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else if err.is_connect() {
            ProviderErrorKind::Network
        } else if err.is_decode() || err.is_body() {
            ProviderErrorKind::InvalidResponse
        } else {
            ProviderErrorKind::Connection
        };
        let mut error = Self::new(provider, kind, err.to_string());
        error.status = err.status().map(|s| s.as_u16());
        error
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ProviderErrorKind::Timeout
    }

    pub fn is_network(&self) -> bool {
        self.kind == ProviderErrorKind::Network
    }

    pub fn is_connection(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Connection | ProviderErrorKind::Network
        )
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Timeout
                | ProviderErrorKind::Network
                | ProviderErrorKind::Connection
                | ProviderErrorKind::RateLimited
                | ProviderErrorKind::Server
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            ProviderError::from_status("openai", 429, "slow down").kind,
            ProviderErrorKind::RateLimited
        );
        assert_eq!(
            ProviderError::from_status("openai", 503, "").kind,
            ProviderErrorKind::Server
        );
        assert_eq!(
            ProviderError::from_status("openai", 401, "bad key").kind,
            ProviderErrorKind::Client
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ProviderError::from_status("openai", 502, "").is_retryable());
        assert!(!ProviderError::from_status("openai", 400, "").is_retryable());

        let err: ColloquyError =
            ProviderError::new("anthropic", ProviderErrorKind::Timeout, "timed out").into();
        assert!(err.is_retryable());
        assert!(!ColloquyError::Configuration("missing key".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_status() {
        let err = ProviderError::from_status("openai", 500, "boom");
        assert_eq!(err.to_string(), "openai server (500): boom");

        let err = ProviderError::new("openai", ProviderErrorKind::Network, "refused");
        assert_eq!(err.to_string(), "openai network: refused");
    }
}
