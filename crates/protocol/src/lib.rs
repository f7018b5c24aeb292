//! Wire protocol spoken between NeoMind chat clients and the server's
//! `/api/chat` WebSocket endpoint.

pub mod adapter;
pub mod constants;
pub mod envelope;
pub mod messages;

pub use adapter::{Inbound, NeoMindProtocol, ProtocolAdapter};
pub use envelope::{ProtocolError, ServerMessage};
pub use messages::{ChatImage, ChatRequest, Pong};
