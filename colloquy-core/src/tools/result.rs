//! Tool errors
//!
//! A failing tool never aborts a turn. The error text is handed back to the
//! model as an error-flagged tool message so it can recover.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured tool error with taxonomy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    /// Error kind
    pub kind: ToolErrorKind,

    /// Human-readable error message
    pub message: String,

    /// Additional context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ToolError {
    /// Create a new tool error
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Create a validation error
    pub fn validation(errors: Vec<ValidationError>) -> Self {
        Self {
            kind: ToolErrorKind::Validation,
            message: format!(
                "Validation failed: {}",
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
            context: Some(serde_json::to_value(&errors).unwrap_or_default()),
        }
    }

    /// The model asked for a tool that is not registered
    pub fn unknown_tool(name: &str) -> Self {
        Self::new(
            ToolErrorKind::NotFound,
            format!("Tool '{}' is not registered", name),
        )
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Failed, message)
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ToolErrorKind::Validation, format!("Invalid arguments: {}", err))
    }
}

/// Error kind taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments did not match the schema
    Validation,

    /// No tool with the requested name
    NotFound,

    /// The tool ran and reported a failure
    Failed,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::Validation => "validation",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::Failed => "failed",
        }
    }
}

/// Validation error for a specific field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Field path (e.g., "args.city")
    pub field: String,

    /// Error message
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
