//! Tool system for agent capabilities
//!
//! Tools are registered on a dialog before a turn starts and are exposed to
//! the model as descriptors. When a reply requests tool calls, the registry
//! runs them concurrently and turns every outcome, failures included, into a
//! tool message for the next model call.
//!
//! # Example
//!
//! ```rust,no_run
//! use colloquy_core::tools::{FnTool, ToolRegistry, ToolSchema};
//! use std::sync::Arc;
//!
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register(Arc::new(FnTool::new(
//!         "clock",
//!         "Current UTC time",
//!         ToolSchema::empty(),
//!         |_| async { Ok(chrono::Utc::now().to_rfc3339()) },
//!     )))
//!     .unwrap();
//! ```

mod registry;
mod result;
mod tool;

pub use registry::{RegistryError, ToolRegistry};
pub use result::{ToolError, ToolErrorKind, ValidationError};
pub use tool::{BoxedTool, FnTool, Tool, ToolMetadata, ToolSchema};
