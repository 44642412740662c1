//! JSON-file store
//!
//! Layout under the root directory:
//!
//! ```text
//! history/<session>.json                 message log (JSON array)
//! history/backups/<session>@<ts>.json    backups
//! sessions/<session>.json                session blob
//! ```
//!
//! `<session>` is the percent-encoded session id, so distinct ids never share
//! a file and never contain the `@` backup separator.
//!
//! Files are replaced through a temp file and rename, so a crash mid-write
//! leaves the previous version in place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::{BlobStore, HistoryStore, SessionBlob};
use crate::error::{ColloquyError, Result};
use crate::message::Message;

const HISTORY_DIR: &str = "history";
const BACKUP_DIR: &str = "backups";
const SESSIONS_DIR: &str = "sessions";
const BACKUP_SEPARATOR: char = '@';

/// Environment variable overriding the default root
const DATA_DIR_ENV: &str = "COLLOQUY_DATA_DIR";

/// Store keeping history and session blobs as JSON files
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    // Serializes read-modify-write of history files within the process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store under `COLLOQUY_DATA_DIR`, else the platform data dir.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory can be determined.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Self::default_root()?))
    }

    pub fn default_root() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV)
            && !dir.trim().is_empty()
        {
            return Ok(PathBuf::from(dir));
        }
        dirs::data_dir()
            .map(|d| d.join("colloquy"))
            .ok_or_else(|| {
                ColloquyError::Configuration("Failed to determine data directory".to_string())
            })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn history_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join(HISTORY_DIR)
            .join(format!("{}.json", file_key(session_id)))
    }

    fn backup_dir(&self) -> PathBuf {
        self.root.join(HISTORY_DIR).join(BACKUP_DIR)
    }

    fn blob_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join(SESSIONS_DIR)
            .join(format!("{}.json", file_key(session_id)))
    }

    /// Backup files of one session, oldest first
    pub async fn backups(&self, session_id: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}{}", file_key(session_id), BACKUP_SEPARATOR);
        let mut entries = match tokio::fs::read_dir(self.backup_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence("list", &self.backup_dir(), e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| persistence("list", &self.backup_dir(), e))?
        {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Reversible, file-name-safe form of a session id
fn file_key(session_id: &str) -> String {
    urlencoding::encode(session_id).into_owned()
}

fn persistence(action: &str, path: &Path, err: impl std::fmt::Display) -> ColloquyError {
    ColloquyError::Persistence(format!("Failed to {} {}: {}", action, path.display(), err))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| persistence("parse", path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(persistence("read", path, e)),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| persistence("create", parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| persistence("write", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| persistence("replace", path, e))
}

#[async_trait]
impl HistoryStore for JsonFileStore {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(read_json(&self.history_path(session_id))
            .await?
            .unwrap_or_default())
    }

    async fn add_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.history_path(session_id);
        let mut log: Vec<Message> = read_json(&path).await?.unwrap_or_default();
        log.extend_from_slice(messages);
        write_json(&path, &log).await
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.history_path(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence("remove", &path, e)),
        }
    }

    async fn backup(&self, session_id: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let log: Vec<Message> = read_json(&self.history_path(session_id))
            .await?
            .unwrap_or_default();

        let id = format!(
            "{}{}{}",
            file_key(session_id),
            BACKUP_SEPARATOR,
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.6fZ")
        );
        let path = self.backup_dir().join(format!("{}.json", id));
        write_json(&path, &log).await?;

        tracing::debug!(
            session_id = %session_id,
            path = %path.display(),
            messages = log.len(),
            "History backed up"
        );
        Ok(id)
    }
}

#[async_trait]
impl BlobStore for JsonFileStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionBlob>> {
        read_json(&self.blob_path(session_id)).await
    }

    async fn set(&self, session_id: &str, blob: SessionBlob) -> Result<()> {
        write_json(&self.blob_path(session_id), &blob).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use serde_json::json;

    #[test]
    fn test_file_key() {
        assert_eq!(file_key("survey::user-42"), "survey%3A%3Auser-42");
        assert_eq!(file_key("a/b"), "a%2Fb");
        assert_ne!(file_key("survey::42"), file_key("survey__42"));
        assert!(!file_key("x@y").contains(BACKUP_SEPARATOR));
    }

    #[tokio::test]
    async fn test_similar_ids_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store
            .add_messages("survey::42", &[Message::human("from survey::42")])
            .await
            .unwrap();

        assert!(store.get_messages("survey__42").await.unwrap().is_empty());
        assert_eq!(
            store.get_messages("survey::42").await.unwrap(),
            vec![Message::human("from survey::42")]
        );

        let mut blob = SessionBlob::new();
        blob.insert("score".into(), json!(3));
        store.set("survey::42", blob).await.unwrap();
        assert!(store.get("survey__42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backups_do_not_match_longer_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.add_messages("s", &[Message::human("a")]).await.unwrap();
        store.add_messages("s-2", &[Message::human("b")]).await.unwrap();

        store.backup("s").await.unwrap();
        store.backup("s-2").await.unwrap();

        assert_eq!(store.backups("s").await.unwrap().len(), 1);
        assert_eq!(store.backups("s-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let call = ToolCall::new("c1", "lookup", json!({"q": "x"}));

        let store = JsonFileStore::new(dir.path());
        store
            .add_messages("demo::1", &[Message::system("sys"), Message::human("hi")])
            .await
            .unwrap();
        store
            .add_messages(
                "demo::1",
                &[
                    Message::ai_with_tool_calls("", vec![call.clone()]),
                    Message::tool_error(&call, "down"),
                ],
            )
            .await
            .unwrap();

        let reopened = JsonFileStore::new(dir.path());
        let messages = reopened.get_messages("demo::1").await.unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].tool_calls()[0], call);
        assert!(messages[3].is_error());
    }

    #[tokio::test]
    async fn test_backup_then_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store
            .add_messages("s", &[Message::human("one"), Message::ai("two")])
            .await
            .unwrap();

        store.backup("s").await.unwrap();
        store.clear("s").await.unwrap();

        assert!(store.get_messages("s").await.unwrap().is_empty());
        let backups = store.backups("s").await.unwrap();
        assert_eq!(backups.len(), 1);

        let saved: Vec<Message> = read_json(&backups[0]).await.unwrap().unwrap();
        assert_eq!(saved.len(), 2);
    }

    #[tokio::test]
    async fn test_blob_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.get("k").await.unwrap().is_none());

        let mut blob = SessionBlob::new();
        blob.insert("is_started".into(), json!(true));
        blob.insert("session_summary".into(), json!(null));
        store.set("k", blob.clone()).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(blob));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let path = store.history_path("bad");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"not json").await.unwrap();

        let err = store.get_messages("bad").await.unwrap_err();
        assert!(matches!(err, ColloquyError::Persistence(_)));
    }
}
