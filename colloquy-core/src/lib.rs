//! # Colloquy - persistent dialog sessions for LLM agents
//!
//! Colloquy manages long-lived conversations between a human and a
//! model-backed agent:
//! - Session fields restored from and persisted to a key/value store
//! - Message history kept in a durable log, compacted into a running
//!   summary once it grows past a threshold
//! - An agent loop alternating model calls and tool execution
//! - Observers that inspect turns and can reject replies, forcing a bounded
//!   retry with corrective instructions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colloquy_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = DialogConfig::new("support")
//!         .with_alias("Assistant")
//!         .with_start_system_msg("You are a helpful assistant");
//!
//!     let mut dialog = Dialog::builder(config)
//!         .session_id("user-42")
//!         .history_store(Arc::new(JsonFileStore::from_env()?))
//!         .build()
//!         .await?;
//!
//!     let reply = dialog.invoke("Hello!").await?;
//!     println!("{}", reply);
//!
//!     dialog.check_for_summary_invocation().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `llm-openai`: OpenAI-compatible provider client (also used for Yandex)
//! - `llm-anthropic`: Anthropic provider client

pub mod agent;
pub mod callbacks;
pub mod compaction;
pub mod config;
pub mod dialog;
pub mod error;
pub mod llm;
pub mod message;
pub mod observer;
pub mod session;
pub mod store;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agent::{AttemptOutcome, LoopState, TurnContext, TurnOutcome};
    pub use crate::callbacks::{Callbacks, DialogCallback};
    pub use crate::compaction::{CompactionOutcome, CompactionPlan, SkipReason, plan_compaction};
    pub use crate::config::{DialogConfig, LLMProviderConfig, ProviderKind, SummaryConfig};
    pub use crate::dialog::{Dialog, DialogBuilder, DialogResponse, Generation, instruction_message};
    pub use crate::error::{ColloquyError, ProviderError, ProviderErrorKind, Result};
    pub use crate::llm::{
        ChatRequest, InvokeContext, InvokeDiagnostics, LLMConfig, LLMProvider,
        LLMProviderFactory, RetryConfig, ScriptedProvider, ScriptedReply, ToolDescriptor,
        call_llm, invoke_with_diagnostics,
    };
    pub use crate::message::{
        InstructionRules, Message, MessageKind, MessagesSize, ToolCall, TranscriptAliases,
        is_instruction, remove_metadata_blocks, stringify_messages,
    };
    pub use crate::observer::{Observer, SessionHandle};
    pub use crate::session::{FieldOwner, PersistedState, RuntimeState, Session};
    pub use crate::store::{
        BlobStore, HistoryStore, InMemoryBlobStore, InMemoryHistoryStore, JsonFileStore,
        SessionBlob, SessionHistory,
    };
    pub use crate::tools::{
        BoxedTool, FnTool, RegistryError, Tool, ToolError, ToolErrorKind, ToolRegistry,
        ToolSchema,
    };
}
