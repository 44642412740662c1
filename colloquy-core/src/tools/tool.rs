//! Tool trait and metadata definitions
//!
//! Tools are named capabilities the model may request during a turn.
//! Each tool declares a JSON schema for its arguments and returns text.

use super::result::{ToolError, ValidationError};
use crate::llm::ToolDescriptor;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Tool metadata for model-facing discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Tool name (unique identifier)
    pub name: String,

    /// Human-readable description
    pub description: String,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// JSON Schema for tool parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub parameters: Value,
}

impl ToolSchema {
    /// Create a schema from a JSON Schema value
    pub fn new(parameters: Value) -> Self {
        Self { parameters }
    }

    /// Create an empty schema (tool takes no parameters)
    pub fn empty() -> Self {
        Self {
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }

    /// Names listed under `required`
    pub fn required_fields(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Check that `args` is an object carrying every required field
    pub fn check_required(&self, args: &Value) -> Result<(), Vec<ValidationError>> {
        let required = self.required_fields();
        let Some(object) = args.as_object() else {
            if required.is_empty() && args.is_null() {
                return Ok(());
            }
            return Err(vec![ValidationError::new(
                "args",
                "arguments must be a JSON object",
            )]);
        };

        let missing: Vec<ValidationError> = required
            .into_iter()
            .filter(|field| !object.contains_key(*field))
            .map(|field| ValidationError::new(field, "is required"))
            .collect();

        if missing.is_empty() { Ok(()) } else { Err(missing) }
    }
}

/// Core tool trait
///
/// Implement this trait to expose a capability to the model. The registry
/// validates arguments before calling `execute`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get tool metadata
    fn metadata(&self) -> &ToolMetadata;

    /// Get tool name (convenience method)
    fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Get tool description (convenience method)
    fn description(&self) -> &str {
        &self.metadata().description
    }

    /// Get the JSON schema for this tool's parameters
    fn schema(&self) -> ToolSchema;

    /// Validate input arguments before execution
    ///
    /// Default implementation checks the schema's `required` list.
    fn validate(&self, args: &Value) -> Result<(), Vec<ValidationError>> {
        self.schema().check_required(args)
    }

    /// Execute the tool with given arguments
    async fn execute(&self, args: Value) -> Result<String, ToolError>;

    /// Descriptor sent to the model provider
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.schema().parameters,
        }
    }
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync>;

/// Tool backed by an async closure
///
/// Use this when a full `Tool` impl is more ceremony than the tool needs.
#[derive(Clone)]
pub struct FnTool {
    metadata: ToolMetadata,
    schema: ToolSchema,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ToolSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            metadata: ToolMetadata::new(name, description),
            schema,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.metadata.name)
            .finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        (self.handler)(args).await
    }
}

/// Type alias for shared tools
pub type BoxedTool = Arc<dyn Tool>;

#[cfg(test)]
mod tool_tests {
    use super::*;
    use serde_json::json;

    struct EchoTool {
        metadata: ToolMetadata,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                metadata: ToolMetadata::new("echo", "Echoes input back"),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new(json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            }))
        }

        async fn execute(&self, args: Value) -> Result<String, ToolError> {
            args.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ToolError::failed("message must be a string"))
        }
    }

    #[tokio::test]
    async fn test_tool_execution() {
        let tool = EchoTool::new();
        let result = tool.execute(json!({ "message": "hello" })).await.unwrap();
        assert_eq!(result, "hello");
    }

    #[test]
    fn test_default_validation_uses_required() {
        let tool = EchoTool::new();
        assert!(tool.validate(&json!({ "message": "x" })).is_ok());

        let errors = tool.validate(&json!({})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "message");

        assert!(tool.validate(&json!("not an object")).is_err());
    }

    #[test]
    fn test_descriptor() {
        let descriptor = EchoTool::new().descriptor();
        assert_eq!(descriptor.name, "echo");
        assert_eq!(descriptor.parameters["required"][0], "message");
    }

    #[tokio::test]
    async fn test_fn_tool() {
        let tool = FnTool::new("upper", "Uppercases text", ToolSchema::empty(), |args| async move {
            Ok(args["text"].as_str().unwrap_or_default().to_uppercase())
        });
        assert!(tool.validate(&Value::Null).is_ok());
        assert_eq!(tool.execute(json!({"text": "abc"})).await.unwrap(), "ABC");
    }
}
