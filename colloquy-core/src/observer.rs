//! Observer extension points
//!
//! Observers plug into every turn of a dialog. They see the human input
//! before the model is called, can veto a candidate reply (forcing a retry
//! with corrective instructions), and own a set of persisted fields that
//! are stored and restored with the session.

use async_trait::async_trait;
use serde::Serialize;
use std::any::Any;

use crate::error::Result;
use crate::llm::InvokeContext;
use crate::message::Message;
use crate::store::SessionBlob;

/// Snapshot of the session an observer is attached to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub dialog_code: String,
    pub alias: String,
}

impl From<&SessionHandle> for InvokeContext {
    fn from(handle: &SessionHandle) -> Self {
        InvokeContext::new(&handle.session_id, &handle.dialog_code, &handle.alias)
    }
}

/// Pluggable turn observer
///
/// Only [`Observer::name`], [`Observer::data`], [`Observer::data_mut`] and
/// [`Observer::as_any`] are required; the hooks default to no-ops that
/// accept every reply.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Identifier used for lookup on the dialog
    fn name(&self) -> &str;

    /// Fields this observer persists with the session
    fn data(&self) -> &SessionBlob;

    fn data_mut(&mut self) -> &mut SessionBlob;

    /// Called once when the observer is registered
    fn init_host(&mut self, _host: SessionHandle, _label: &str) {}

    /// Inspect the turn before the model is called.
    ///
    /// Errors are logged and do not abort the turn.
    async fn pre_check(&mut self, _human_text: &str, _pending: &[Message]) -> Result<()> {
        Ok(())
    }

    /// Validate a candidate reply.
    ///
    /// Returning `false` rejects it; corrective instructions pushed into
    /// `temp_out` are sent with the retry.
    async fn post_check(&mut self, _ai_text: &str, _temp_out: &mut Vec<Message>) -> Result<bool> {
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct LengthGuard {
        data: SessionBlob,
        host: Option<SessionHandle>,
        max_chars: usize,
    }

    #[async_trait]
    impl Observer for LengthGuard {
        fn name(&self) -> &str {
            "length_guard"
        }

        fn data(&self) -> &SessionBlob {
            &self.data
        }

        fn data_mut(&mut self) -> &mut SessionBlob {
            &mut self.data
        }

        fn init_host(&mut self, host: SessionHandle, _label: &str) {
            self.host = Some(host);
        }

        async fn post_check(&mut self, ai_text: &str, temp_out: &mut Vec<Message>) -> Result<bool> {
            if ai_text.chars().count() <= self.max_chars {
                return Ok(true);
            }
            temp_out.push(Message::system(format!(
                "Answer in at most {} characters",
                self.max_chars
            )));
            self.data.insert("rejections".into(), json!(1));
            Ok(false)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn test_default_hooks_and_post_check() {
        let mut guard = LengthGuard {
            data: SessionBlob::new(),
            host: None,
            max_chars: 5,
        };
        guard.init_host(
            SessionHandle {
                session_id: "demo::1".into(),
                dialog_code: "demo".into(),
                alias: "Bot".into(),
            },
            "guard",
        );
        assert_eq!(guard.host.as_ref().unwrap().session_id, "demo::1");
        assert!(guard.pre_check("hi", &[]).await.is_ok());

        let mut temp = Vec::new();
        assert!(guard.post_check("short", &mut temp).await.unwrap());
        assert!(temp.is_empty());

        assert!(!guard.post_check("far too long", &mut temp).await.unwrap());
        assert_eq!(temp.len(), 1);
        assert_eq!(guard.data()["rejections"], json!(1));

        let any = guard.as_any();
        assert!(any.downcast_ref::<LengthGuard>().is_some());
    }

    #[test]
    fn test_handle_to_invoke_context() {
        let handle = SessionHandle {
            session_id: "s".into(),
            dialog_code: "d".into(),
            alias: "a".into(),
        };
        let ctx = InvokeContext::from(&handle);
        assert_eq!(ctx, InvokeContext::new("s", "d", "a"));
    }
}
