//! Durable storage contracts for sessions
//!
//! Two stores back a dialog:
//!
//! - [`HistoryStore`]: the ordered message log of a session
//! - [`BlobStore`]: the flat JSON mapping of a session's persisted fields
//!
//! Both are keyed by the session id. In-memory and JSON-file implementations
//! ship with the crate; anything else plugs in through the traits.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::{HistoryBackup, InMemoryBlobStore, InMemoryHistoryStore, StoreOp};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::Result;
use crate::message::Message;

/// Persisted fields of one session
pub type SessionBlob = Map<String, Value>;

/// Ordered message log keyed by session id
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// All messages of the session, oldest first
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Append messages in order
    async fn add_messages(&self, session_id: &str, messages: &[Message]) -> Result<()>;

    /// Remove every message of the session
    async fn clear(&self, session_id: &str) -> Result<()>;

    /// Copy the current log aside and return an identifier for the copy
    async fn backup(&self, session_id: &str) -> Result<String>;
}

/// Flat key/value store of session fields
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionBlob>>;

    async fn set(&self, session_id: &str, blob: SessionBlob) -> Result<()>;
}

/// History store bound to one session key
///
/// A read-only view serves reads and silently drops writes.
#[derive(Clone)]
pub struct SessionHistory {
    store: Arc<dyn HistoryStore>,
    session_id: String,
    read_only: bool,
}

impl std::fmt::Debug for SessionHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHistory")
            .field("session_id", &self.session_id)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl SessionHistory {
    pub fn new(store: Arc<dyn HistoryStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            read_only: false,
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Point the view at another session key
    pub fn rekey(&mut self, session_id: impl Into<String>) {
        self.session_id = session_id.into();
    }

    pub async fn get_messages(&self) -> Result<Vec<Message>> {
        self.store.get_messages(&self.session_id).await
    }

    pub async fn add_messages(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        if self.read_only {
            tracing::debug!(
                session_id = %self.session_id,
                count = messages.len(),
                "Read-only history, dropping append"
            );
            return Ok(());
        }
        self.store.add_messages(&self.session_id, messages).await
    }

    pub async fn clear(&self) -> Result<()> {
        if self.read_only {
            tracing::debug!(session_id = %self.session_id, "Read-only history, skipping clear");
            return Ok(());
        }
        self.store.clear(&self.session_id).await
    }

    /// Back up the log; `None` for read-only views
    pub async fn backup(&self) -> Result<Option<String>> {
        if self.read_only {
            return Ok(None);
        }
        self.store.backup(&self.session_id).await.map(Some)
    }
}
