//! Session state of one conversation
//!
//! A session is keyed by `dialog_code::external_id`. Its fields come from
//! three owners: the core persisted fields, caller-declared storables and the
//! registered observers. Reads merge all three into one flat mapping; writes
//! are routed through a lookup table built as owners are registered.

mod state;

pub use state::{PersistedState, RuntimeState, truthy};

use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::message::{Message, TranscriptAliases, exclude_instructions, stringify_messages};
use crate::observer::{Observer, SessionHandle};
use crate::store::{BlobStore, SessionBlob};

const SESSION_ID_SEPARATOR: &str = "::";

/// Who owns a session field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOwner {
    Persisted,
    Storable,
    /// Index into the observer list
    Observer(usize),
}

/// Join dialog code and external id, dropping empty parts
pub fn compose_session_id(dialog_code: &str, external_id: &str) -> String {
    [dialog_code, external_id]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(SESSION_ID_SEPARATOR)
}

/// State of one conversation
pub struct Session {
    id: String,
    pub persisted: PersistedState,
    pub runtime: RuntimeState,
    storables: SessionBlob,
    restore_exceptions: Vec<String>,
    observers: Vec<Box<dyn Observer>>,
    owners: HashMap<String, FieldOwner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("persisted", &self.persisted)
            .field("storables", &self.storables)
            .field("observers", &self.observer_names())
            .finish()
    }
}

impl Session {
    pub fn new(dialog_code: &str, external_id: &str) -> Self {
        let mut owners = HashMap::new();
        for field in PersistedState::FIELDS {
            owners.insert(field.to_string(), FieldOwner::Persisted);
        }

        Self {
            id: compose_session_id(dialog_code, external_id),
            persisted: PersistedState {
                dialog_code: dialog_code.to_string(),
                ..Default::default()
            },
            runtime: RuntimeState::default(),
            storables: SessionBlob::new(),
            restore_exceptions: Vec::new(),
            observers: Vec::new(),
            owners,
        }
    }

    /// Declare custom persisted fields; unset ones read as `null`
    pub fn with_storables<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            self.owners
                .entry(field.clone())
                .or_insert(FieldOwner::Storable);
            self.storables.entry(field).or_insert(Value::Null);
        }
        self
    }

    /// Keys never overwritten by `restore`
    pub fn with_restore_exceptions<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.restore_exceptions = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Re-key the session under `dialog_code`
    pub fn set_id(&mut self, external_id: &str) {
        self.id = compose_session_id(&self.persisted.dialog_code, external_id);
    }

    /// External id of a two-part key, else empty
    pub fn initial_id(&self) -> &str {
        let parts: Vec<&str> = self.id.split(SESSION_ID_SEPARATOR).collect();
        match parts.as_slice() {
            [_, external] => external,
            _ => "",
        }
    }

    pub fn handle(&self, alias: &str) -> SessionHandle {
        SessionHandle {
            session_id: self.id.clone(),
            dialog_code: self.persisted.dialog_code.clone(),
            alias: alias.to_string(),
        }
    }

    /// Attach an observer and index the fields it declares
    pub fn register_observer(&mut self, mut observer: Box<dyn Observer>, host: SessionHandle, label: &str) {
        observer.init_host(host, label);
        let index = self.observers.len();
        for key in observer.data().keys() {
            self.owners
                .entry(key.clone())
                .or_insert(FieldOwner::Observer(index));
        }
        tracing::debug!(
            session_id = %self.id,
            observer = %observer.name(),
            fields = observer.data().len(),
            "Observer registered"
        );
        self.observers.push(observer);
    }

    pub fn observers(&self) -> &[Box<dyn Observer>] {
        &self.observers
    }

    pub fn observers_mut(&mut self) -> &mut [Box<dyn Observer>] {
        &mut self.observers
    }

    pub fn observer(&self, name: &str) -> Option<&dyn Observer> {
        self.observers
            .iter()
            .find(|o| o.name() == name)
            .map(|o| o.as_ref())
    }

    pub fn observer_names(&self) -> Vec<&str> {
        self.observers.iter().map(|o| o.name()).collect()
    }

    /// Owner of `key`, if any
    pub fn field_owner(&self, key: &str) -> Option<FieldOwner> {
        self.owners.get(key).copied().or_else(|| {
            self.observers
                .iter()
                .position(|o| o.data().contains_key(key))
                .map(FieldOwner::Observer)
        })
    }

    /// Flat view of every persisted field
    pub fn data(&self) -> SessionBlob {
        let mut data = self.storables.clone();
        data.extend(self.persisted.to_blob());
        for observer in &self.observers {
            data.extend(observer.data().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        data
    }

    /// Write one field through its owner.
    ///
    /// Returns `false` when no owner declares `key`.
    ///
    /// # Errors
    ///
    /// Fails if a core field receives a value of the wrong type.
    pub fn set_data(&mut self, key: &str, value: Value) -> Result<bool> {
        match self.field_owner(key) {
            Some(FieldOwner::Persisted) => self.persisted.set_field(key, value)?,
            Some(FieldOwner::Storable) => {
                self.storables.insert(key.to_string(), value);
            }
            Some(FieldOwner::Observer(index)) => {
                self.owners
                    .entry(key.to_string())
                    .or_insert(FieldOwner::Observer(index));
                self.observers[index]
                    .data_mut()
                    .insert(key.to_string(), value);
            }
            None => {
                tracing::warn!(session_id = %self.id, key = %key, "Unknown session field");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Load stored fields once per object lifetime.
    ///
    /// Returns whether data was applied.
    ///
    /// # Errors
    ///
    /// Store failures and mistyped core fields are surfaced.
    pub async fn restore(&mut self, store: &dyn BlobStore) -> Result<bool> {
        if self.runtime.is_restored {
            return Ok(false);
        }
        self.runtime.is_restored = true;

        let Some(blob) = store.get(&self.id).await? else {
            tracing::debug!(session_id = %self.id, "No stored session data");
            return Ok(false);
        };

        let mut applied = 0;
        for (key, value) in blob {
            if self.restore_exceptions.iter().any(|k| *k == key) {
                continue;
            }
            if self.storables.contains_key(&key) {
                self.storables.insert(key.clone(), value.clone());
                applied += 1;
            } else if PersistedState::has_field(&key) {
                self.persisted.set_field(&key, value.clone())?;
                applied += 1;
            }
            for observer in &mut self.observers {
                if observer.data().contains_key(&key) {
                    observer.data_mut().insert(key.clone(), value.clone());
                    applied += 1;
                }
            }
        }

        tracing::info!(session_id = %self.id, fields = applied, "Session restored");
        Ok(true)
    }

    /// Write `data()` under the session key
    pub async fn store(&self, store: &dyn BlobStore) -> Result<()> {
        store.set(&self.id, self.data()).await?;
        tracing::debug!(session_id = %self.id, "Session stored");
        Ok(())
    }

    /// Interrupted, or finished while the user is not asking to speak
    pub fn stop_dialog_condition(&self) -> bool {
        if self.runtime.is_interrupted {
            return true;
        }
        let data = self.data();
        truthy(data.get("is_finished")) && !truthy(data.get("user_wants_to_speak"))
    }

    pub fn interrupt(&mut self) {
        self.runtime.is_interrupted = true;
    }

    pub fn reset(&mut self) {
        self.persisted.is_over = false;
        self.persisted.is_started = false;
        self.runtime.is_interrupted = false;
    }

    /// Replace the buffered history and re-render the transcript
    pub fn set_messages(&mut self, messages: Vec<Message>, aliases: &TranscriptAliases) {
        self.runtime.transcript =
            stringify_messages(exclude_instructions(&messages), aliases);
        self.runtime.messages = messages;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBlobStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::any::Any;

    struct Scorer {
        data: SessionBlob,
    }

    impl Scorer {
        fn new() -> Self {
            let mut data = SessionBlob::new();
            data.insert("score".into(), json!(0));
            data.insert("is_finished".into(), json!(false));
            Self { data }
        }
    }

    #[async_trait]
    impl Observer for Scorer {
        fn name(&self) -> &str {
            "scorer"
        }
        fn data(&self) -> &SessionBlob {
            &self.data
        }
        fn data_mut(&mut self) -> &mut SessionBlob {
            &mut self.data
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn session() -> Session {
        let mut session = Session::new("survey", "42")
            .with_storables(["topic", "user_wants_to_speak"])
            .with_restore_exceptions(["user_wants_to_speak"]);
        let handle = session.handle("Bot");
        session.register_observer(Box::new(Scorer::new()), handle, "scorer");
        session
    }

    #[test]
    fn test_session_ids() {
        assert_eq!(compose_session_id("survey", "42"), "survey::42");
        assert_eq!(compose_session_id("", "42"), "42");

        let mut session = Session::new("survey", "42");
        assert_eq!(session.initial_id(), "42");
        session.set_id("77");
        assert_eq!(session.id(), "survey::77");

        assert_eq!(Session::new("", "42").initial_id(), "");
    }

    #[test]
    fn test_data_merges_owners() {
        let session = session();
        let data = session.data();
        assert_eq!(data["topic"], json!(null));
        assert_eq!(data["dialog_code"], json!("survey"));
        assert_eq!(data["score"], json!(0));
        assert_eq!(data.len(), 2 + PersistedState::FIELDS.len() + 2);
    }

    #[test]
    fn test_set_data_routes_by_owner() {
        let mut session = session();

        assert!(session.set_data("is_over", json!(true)).unwrap());
        assert!(session.persisted.is_over);

        assert!(session.set_data("topic", json!("pets")).unwrap());
        assert!(session.set_data("score", json!(5)).unwrap());
        assert_eq!(session.observer("scorer").unwrap().data()["score"], json!(5));

        assert!(!session.set_data("nobody_owns_this", json!(1)).unwrap());
        assert!(!session.data().contains_key("nobody_owns_this"));

        assert_eq!(session.field_owner("topic"), Some(FieldOwner::Storable));
        assert_eq!(session.field_owner("score"), Some(FieldOwner::Observer(0)));
    }

    #[tokio::test]
    async fn test_restore_is_idempotent_and_honours_exceptions() {
        let store = InMemoryBlobStore::new();
        let mut blob = SessionBlob::new();
        blob.insert("is_started".into(), json!(true));
        blob.insert("topic".into(), json!("travel"));
        blob.insert("score".into(), json!(9));
        blob.insert("user_wants_to_speak".into(), json!(true));
        blob.insert("stale_key".into(), json!("ignored"));
        store.insert("survey::42", blob);

        let mut session = session();
        assert!(session.restore(&store).await.unwrap());
        assert!(session.persisted.is_started);
        assert_eq!(session.data()["topic"], json!("travel"));
        assert_eq!(session.data()["score"], json!(9));
        assert_eq!(session.data()["user_wants_to_speak"], json!(null));
        assert!(!session.data().contains_key("stale_key"));

        // A second restore is a no-op even if the store changed
        session.set_data("topic", json!("local")).unwrap();
        assert!(!session.restore(&store).await.unwrap());
        assert_eq!(session.data()["topic"], json!("local"));
    }

    #[tokio::test]
    async fn test_store_restore_round_trip() {
        let store = InMemoryBlobStore::new();

        let mut first = session();
        first.set_data("topic", json!("music")).unwrap();
        first.set_data("score", json!(3)).unwrap();
        first.persisted.last_human_message = "hello".into();
        first.persisted.session_summary = Some("we met".into());
        first.store(&store).await.unwrap();

        let mut second = session();
        assert!(second.restore(&store).await.unwrap());
        assert_eq!(second.data(), first.data());
    }

    #[tokio::test]
    async fn test_restore_without_record() {
        let store = InMemoryBlobStore::new();
        let mut session = session();
        assert!(!session.restore(&store).await.unwrap());
        assert!(session.runtime.is_restored);
    }

    #[test]
    fn test_stop_dialog_condition() {
        let mut session = session();
        assert!(!session.stop_dialog_condition());

        session.interrupt();
        assert!(session.stop_dialog_condition());

        session.reset();
        assert!(!session.stop_dialog_condition());

        session.set_data("is_finished", json!(true)).unwrap();
        assert!(session.stop_dialog_condition());
    }

    #[test]
    fn test_stop_condition_respects_user_wants_to_speak() {
        let mut session = Session::new("d", "1").with_storables(["is_finished", "user_wants_to_speak"]);
        session.set_data("is_finished", json!(1)).unwrap();
        session.set_data("user_wants_to_speak", json!("yes")).unwrap();
        assert!(!session.stop_dialog_condition());
    }
}
