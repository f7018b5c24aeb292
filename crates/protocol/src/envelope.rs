use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::kinds;

/// Errors decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message type is empty")]
    EmptyType,
}

/// Envelope for every message the server pushes.
///
/// Only the `type` discriminant and `sessionId` are typed; all other fields
/// are kept verbatim in `fields`, including types this crate does not know
/// about. A `"sessionId": null` reads as `None` and is omitted when the
/// message is serialized again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ServerMessage {
    /// Decodes a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let msg: ServerMessage = serde_json::from_str(text)?;
        if msg.kind.is_empty() {
            return Err(ProtocolError::EmptyType);
        }
        Ok(msg)
    }

    /// Creates a message of the given type with no other fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            session_id: None,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter, mostly useful in tests.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Returns a string field, if present and a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// The `message` field carried by `Error` and `Warning`.
    pub fn message(&self) -> Option<&str> {
        self.str_field("message")
    }

    /// The `content` field carried by streamed agent output.
    pub fn content(&self) -> Option<&str> {
        self.str_field("content")
    }

    /// Session id announced by `session_created` / `session_switched`.
    pub fn announced_session(&self) -> Option<&str> {
        if self.is(kinds::SESSION_CREATED) || self.is(kinds::SESSION_SWITCHED) {
            self.session_id.as_deref().filter(|s| !s.is_empty())
        } else {
            None
        }
    }

    /// Deserializes the whole message into a typed view.
    pub fn parse_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}
