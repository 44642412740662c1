//! Lifecycle callbacks of a dialog
//!
//! Callbacks registered for the same event run concurrently; the first
//! error is returned to the caller of the dialog operation.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;

use crate::error::Result;
use crate::observer::SessionHandle;
use crate::store::SessionBlob;

/// Hooks fired around dialog operations
#[async_trait]
pub trait DialogCallback: Send + Sync {
    /// After `restore` applied stored data
    async fn on_restore_end(&self, _session: &SessionHandle, _data: &SessionBlob) -> Result<()> {
        Ok(())
    }

    /// After a turn produced its final reply
    async fn on_invoke_end(&self, _session: &SessionHandle, _reply: &str) -> Result<()> {
        Ok(())
    }
}

/// Registered callbacks
#[derive(Clone, Default)]
pub struct Callbacks {
    items: Vec<Arc<dyn DialogCallback>>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("count", &self.items.len())
            .finish()
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, callback: Arc<dyn DialogCallback>) {
        self.items.push(callback);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub async fn restore_end(&self, session: &SessionHandle, data: &SessionBlob) -> Result<()> {
        try_join_all(self.items.iter().map(|c| c.on_restore_end(session, data))).await?;
        Ok(())
    }

    pub async fn invoke_end(&self, session: &SessionHandle, reply: &str) -> Result<()> {
        try_join_all(self.items.iter().map(|c| c.on_invoke_end(session, reply))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ColloquyError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DialogCallback for Recorder {
        async fn on_invoke_end(&self, _session: &SessionHandle, reply: &str) -> Result<()> {
            self.replies.lock().unwrap().push(reply.to_string());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl DialogCallback for Failing {
        async fn on_restore_end(&self, _session: &SessionHandle, _data: &SessionBlob) -> Result<()> {
            Err(ColloquyError::Other("restore hook failed".into()))
        }
    }

    #[tokio::test]
    async fn test_callbacks_run_and_propagate_errors() {
        let recorder = Arc::new(Recorder::default());
        let mut callbacks = Callbacks::new();
        callbacks.add(recorder.clone());
        callbacks.add(Arc::new(Failing));

        let handle = SessionHandle::default();
        callbacks.invoke_end(&handle, "done").await.unwrap();
        assert_eq!(*recorder.replies.lock().unwrap(), vec!["done"]);

        let err = callbacks
            .restore_end(&handle, &SessionBlob::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("restore hook failed"));
    }
}
