use serde::{Deserialize, Serialize};

use crate::constants::kinds;

/// A chat turn sent to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ChatImage>>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            backend_id: None,
            images: None,
        }
    }

    pub fn in_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_backend(mut self, backend_id: Option<String>) -> Self {
        self.backend_id = backend_id;
        self
    }

    pub fn with_image(mut self, image: ChatImage) -> Self {
        self.images.get_or_insert_with(Vec::new).push(image);
        self
    }
}

/// Inline image attached to a multimodal chat turn.
///
/// `data` is base64 (optionally a `data:` URL), as the server forwards it
/// to the LLM backend untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatImage {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Reply to the server's JSON heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for Pong {
    fn default() -> Self {
        Self {
            kind: kinds::PONG.into(),
        }
    }
}
