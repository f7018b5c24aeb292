//! Classification of inbound frames.
//!
//! Heartbeat and auth-failure detection live behind [`ProtocolAdapter`] so
//! the connection driver never matches on wire strings itself. A versioned
//! protocol only needs a new adapter.

use tracing::trace;

use crate::constants::kinds;
use crate::envelope::{ProtocolError, ServerMessage};

/// Serialized form of [`crate::messages::Pong`].
pub const PONG_FRAME: &str = r#"{"type":"pong"}"#;

/// Server error texts that mean the credential was refused.
const AUTH_FAILURE_PATTERNS: &[&str] = &[
    "invalid or expired token",
    "authentication required",
    "token expired",
    "invalid token",
    "unauthorized",
];

/// What an inbound text frame means to the connection.
#[derive(Debug)]
pub enum Inbound {
    /// Not a valid envelope.
    Malformed(ProtocolError),
    /// Server heartbeat; answer with [`ProtocolAdapter::heartbeat_reply`].
    Heartbeat,
    /// The server refused our credential.
    AuthFailure(String),
    /// Anything else, forwarded to subscribers.
    Message(ServerMessage),
}

/// Protocol-specific handling of inbound frames.
pub trait ProtocolAdapter: Send + Sync + 'static {
    /// Classifies one inbound text frame.
    fn classify(&self, text: &str) -> Inbound;

    /// Frame sent in response to [`Inbound::Heartbeat`].
    fn heartbeat_reply(&self) -> String;
}

/// The JSON protocol spoken by the NeoMind server.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeoMindProtocol;

impl ProtocolAdapter for NeoMindProtocol {
    fn classify(&self, text: &str) -> Inbound {
        let msg = match ServerMessage::parse(text) {
            Ok(m) => m,
            Err(e) => return Inbound::Malformed(e),
        };

        if msg.is(kinds::PING) {
            trace!("server heartbeat");
            return Inbound::Heartbeat;
        }

        if msg.is(kinds::ERROR)
            && let Some(text) = msg.message()
            && is_auth_failure(text)
        {
            return Inbound::AuthFailure(text.to_string());
        }

        Inbound::Message(msg)
    }

    fn heartbeat_reply(&self) -> String {
        PONG_FRAME.to_string()
    }
}

/// Returns `true` if a server error message reports a rejected credential.
pub fn is_auth_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    AUTH_FAILURE_PATTERNS.iter().any(|p| lower.contains(p))
}
