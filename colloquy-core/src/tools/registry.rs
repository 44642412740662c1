//! Tool registry for registration, lookup and dispatch
//!
//! The `ToolRegistry` provides:
//! - Tool registration with duplicate detection, in registration order
//! - Lookup by name with schema validation
//! - Descriptors for the model request
//! - Concurrent dispatch of a reply's tool calls
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy_core::tools::{ToolRegistry, Tool};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(Arc::new(WeatherTool::new()))?;
//!
//! // Results come back in call order, failures as error-flagged messages
//! let results = registry.dispatch_all(reply.tool_calls()).await;
//! ```

use super::result::ToolError;
use super::tool::Tool;
use crate::llm::ToolDescriptor;
use crate::message::{Message, ToolCall};
use std::sync::Arc;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Tool with this name already exists
    DuplicateTool(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateTool(name) => {
                write!(f, "Tool '{}' is already registered", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<RegistryError> for crate::error::ColloquyError {
    fn from(err: RegistryError) -> Self {
        crate::error::ColloquyError::Configuration(err.to_string())
    }
}

/// Registry of the tools exposed to the model
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.tools.len())
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    ///
    /// Returns an error if a tool with the same name is already registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        if self.contains(tool.name()) {
            return Err(RegistryError::DuplicateTool(tool.name().to_string()));
        }
        self.tools.push(tool);
        Ok(())
    }

    /// Register multiple tools at once
    ///
    /// Fails if any tool name is duplicated.
    pub fn register_all(&mut self, tools: Vec<Arc<dyn Tool>>) -> Result<(), RegistryError> {
        for tool in tools {
            self.register(tool)?;
        }
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Check if a tool is registered
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptors for every registered tool
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    /// Run one tool call.
    ///
    /// Lookup, validation and execution failures become `ToolError`s.
    pub async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::unknown_tool(&call.name))?;

        tool.validate(&call.arguments).map_err(ToolError::validation)?;
        tool.execute(call.arguments.clone()).await
    }

    /// Run one tool call and wrap the outcome as a tool message
    pub async fn dispatch(&self, call: &ToolCall) -> Message {
        tracing::debug!(tool = %call.name, call_id = %call.id, "Dispatching tool call");
        match self.execute(call).await {
            Ok(output) => Message::tool_result(call, output),
            Err(error) => {
                tracing::warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    error = %error,
                    "Tool call failed"
                );
                Message::tool_error(call, error.to_string())
            }
        }
    }

    /// Run all calls concurrently; results keep call order
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<Message> {
        futures::future::join_all(calls.iter().map(|call| self.dispatch(call))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolErrorKind, ToolMetadata, ToolSchema};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SearchTool {
        metadata: ToolMetadata,
    }

    impl SearchTool {
        fn new() -> Self {
            Self {
                metadata: ToolMetadata::new("search", "Search the web for information"),
            }
        }
    }

    #[async_trait]
    impl Tool for SearchTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new(json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }))
        }

        async fn execute(&self, args: Value) -> Result<String, ToolError> {
            Ok(format!("results for {}", args["query"]))
        }
    }

    struct BrokenTool {
        metadata: ToolMetadata,
    }

    #[async_trait]
    impl Tool for BrokenTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::empty()
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            Err(ToolError::failed("backend unavailable"))
        }
    }

    fn broken() -> Arc<dyn Tool> {
        Arc::new(BrokenTool {
            metadata: ToolMetadata::new("broken", "Always fails"),
        })
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ToolRegistry::new();
        let tool = Arc::new(SearchTool::new());

        assert!(registry.register(tool.clone()).is_ok());
        assert!(registry.contains("search"));
        assert!(registry.get("search").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ToolRegistry::new();
        let tool1 = Arc::new(SearchTool::new());
        let tool2 = Arc::new(SearchTool::new());

        assert!(registry.register(tool1).is_ok());
        assert!(matches!(
            registry.register(tool2),
            Err(RegistryError::DuplicateTool(_))
        ));
    }

    #[test]
    fn test_register_all_keeps_order() {
        let mut registry = ToolRegistry::new();
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(SearchTool::new()), broken()];

        assert!(registry.register_all(tools).is_ok());
        assert_eq!(registry.names(), vec!["search", "broken"]);
        assert_eq!(registry.descriptors()[1].name, "broken");
    }

    struct CountingTool {
        metadata: ToolMetadata,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }

        fn schema(&self) -> ToolSchema {
            SearchTool::new().schema()
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok("ran".to_string())
        }
    }

    #[tokio::test]
    async fn test_invalid_args_never_reach_the_tool() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(CountingTool {
                metadata: ToolMetadata::new("count", "Counts runs"),
                runs: runs.clone(),
            }))
            .unwrap();

        let err = registry
            .execute(&ToolCall::new("c1", "count", json!({"q": "typo"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Validation);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        let ok = registry
            .execute(&ToolCall::new("c2", "count", json!({"query": "x"})))
            .await
            .unwrap();
        assert_eq!(ok, "ran");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_all_isolates_failures() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SearchTool::new())).unwrap();
        registry.register(broken()).unwrap();

        let calls = vec![
            ToolCall::new("c1", "search", json!({"query": "rust"})),
            ToolCall::new("c2", "broken", json!({})),
            ToolCall::new("c3", "unknown", json!({})),
            ToolCall::new("c4", "search", json!({})),
        ];

        let results = registry.dispatch_all(&calls).await;
        assert_eq!(results.len(), 4);

        assert!(!results[0].is_error());
        assert_eq!(results[0].content(), "results for \"rust\"");

        assert!(results[1].is_error());
        assert!(results[1].content().contains("backend unavailable"));

        assert!(results[2].is_error());
        assert!(results[2].content().contains("not registered"));

        assert!(results[3].is_error());
        assert!(results[3].content().contains("query: is required"));

        let ids: Vec<_> = results
            .iter()
            .map(|m| match m {
                Message::Tool { tool_call_id, .. } => tool_call_id.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);
    }
}
