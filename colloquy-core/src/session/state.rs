//! Persisted and runtime halves of a session

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;
use crate::store::SessionBlob;

/// Core fields stored with every session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub is_over: bool,
    pub is_started: bool,
    pub dialog_code: String,
    pub last_human_message: String,
    pub session_summary: Option<String>,
}

impl PersistedState {
    pub const FIELDS: [&'static str; 5] = [
        "is_over",
        "is_started",
        "dialog_code",
        "last_human_message",
        "session_summary",
    ];

    pub fn has_field(key: &str) -> bool {
        Self::FIELDS.contains(&key)
    }

    pub fn to_blob(&self) -> SessionBlob {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => SessionBlob::new(),
        }
    }

    /// Set one field from a JSON value.
    ///
    /// # Errors
    ///
    /// Fails if the value has the wrong type for the field.
    pub fn set_field(&mut self, key: &str, value: Value) -> Result<()> {
        let mut map = self.to_blob();
        map.insert(key.to_string(), value);
        *self = serde_json::from_value(Value::Object(map))?;
        Ok(())
    }
}

/// Fields that live only as long as the dialog object
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    /// Stored history as of the last load
    pub messages: Vec<Message>,
    /// Rendered transcript of `messages` without instructions
    pub transcript: String,
    pub is_interrupted: bool,
    /// Set when a tool ran during the current turn
    pub is_tool_activated: bool,
    /// Extra instructions sent with the next model call
    pub temp_instructions: Vec<Message>,
    pub is_restored: bool,
}

/// JSON truthiness: `null`, `false`, `0` and `""` are false
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthy() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&json!(null))));
        assert!(!truthy(Some(&json!(false))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(0.0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(truthy(Some(&json!(true))));
        assert!(truthy(Some(&json!(2))));
        assert!(truthy(Some(&json!("yes"))));
        assert!(truthy(Some(&json!([]))));
    }

    #[test]
    fn test_persisted_blob_has_every_field() {
        let blob = PersistedState::default().to_blob();
        for field in PersistedState::FIELDS {
            assert!(blob.contains_key(field), "missing {}", field);
        }
        assert_eq!(blob["session_summary"], json!(null));
    }

    #[test]
    fn test_set_field() {
        let mut state = PersistedState::default();
        state.set_field("is_over", json!(true)).unwrap();
        state.set_field("session_summary", json!("talked about cats")).unwrap();
        assert!(state.is_over);
        assert_eq!(state.session_summary.as_deref(), Some("talked about cats"));

        assert!(state.set_field("is_started", json!("nope")).is_err());
        assert!(!state.is_started);
    }
}
