//! In-memory stores for testing and lightweight deployments
//!
//! Nothing survives the process. The history store also keeps a journal of
//! write operations so tests can assert their order.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{BlobStore, HistoryStore, SessionBlob};
use crate::error::Result;
use crate::message::Message;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Journal entry of a history write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Add { session_id: String, count: usize },
    Clear { session_id: String },
    Backup { session_id: String, id: String },
}

/// Snapshot taken by [`HistoryStore::backup`]
#[derive(Debug, Clone)]
pub struct HistoryBackup {
    pub id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// In-memory history store
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    logs: RwLock<HashMap<String, Vec<Message>>>,
    backups: RwLock<Vec<HistoryBackup>>,
    journal: RwLock<Vec<StoreOp>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backups of one session, oldest first
    pub fn backups(&self, session_id: &str) -> Vec<HistoryBackup> {
        read(&self.backups)
            .iter()
            .filter(|b| b.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Every write so far, in order
    pub fn operations(&self) -> Vec<StoreOp> {
        read(&self.journal).clone()
    }

    /// Session ids with a log
    pub fn sessions(&self) -> Vec<String> {
        let mut keys: Vec<String> = read(&self.logs).keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(read(&self.logs).get(session_id).cloned().unwrap_or_default())
    }

    async fn add_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        write(&self.logs)
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        write(&self.journal).push(StoreOp::Add {
            session_id: session_id.to_string(),
            count: messages.len(),
        });
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        write(&self.logs).remove(session_id);
        write(&self.journal).push(StoreOp::Clear {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    async fn backup(&self, session_id: &str) -> Result<String> {
        let messages = read(&self.logs).get(session_id).cloned().unwrap_or_default();
        let id = uuid::Uuid::new_v4().to_string();

        write(&self.backups).push(HistoryBackup {
            id: id.clone(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            messages,
        });
        write(&self.journal).push(StoreOp::Backup {
            session_id: session_id.to_string(),
            id: id.clone(),
        });
        Ok(id)
    }
}

/// In-memory session blob store
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, SessionBlob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob without going through the trait
    pub fn insert(&self, session_id: impl Into<String>, blob: SessionBlob) {
        write(&self.blobs).insert(session_id.into(), blob);
    }

    pub fn len(&self) -> usize {
        read(&self.blobs).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.blobs).is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionBlob>> {
        Ok(read(&self.blobs).get(session_id).cloned())
    }

    async fn set(&self, session_id: &str, blob: SessionBlob) -> Result<()> {
        write(&self.blobs).insert(session_id.to_string(), blob);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_backup_snapshots_log() {
        let store = InMemoryHistoryStore::new();
        store
            .add_messages("s", &[Message::system("sys"), Message::human("hi")])
            .await
            .unwrap();

        let id = store.backup("s").await.unwrap();
        store.clear("s").await.unwrap();
        store.add_messages("s", &[Message::system("new")]).await.unwrap();

        let backups = store.backups("s");
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].id, id);
        assert_eq!(backups[0].messages.len(), 2);
        assert_eq!(store.get_messages("s").await.unwrap().len(), 1);

        assert_eq!(
            store.operations(),
            vec![
                StoreOp::Add { session_id: "s".into(), count: 2 },
                StoreOp::Backup { session_id: "s".into(), id },
                StoreOp::Clear { session_id: "s".into() },
                StoreOp::Add { session_id: "s".into(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_blob_round_trip() {
        let store = InMemoryBlobStore::new();
        assert!(store.get("missing").await.unwrap().is_none());

        let mut blob = SessionBlob::new();
        blob.insert("is_over".into(), json!(true));
        store.set("k", blob.clone()).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(blob));
        assert_eq!(store.len(), 1);
    }
}
