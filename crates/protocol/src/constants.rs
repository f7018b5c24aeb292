//! Protocol constants shared by the client and its tests.

/// Normal closure. Sent on user-initiated disconnects; never reconnects.
pub const WS_CLOSE_NORMAL: u16 = 1000;

/// Close frame carried no status code.
pub const WS_CLOSE_NO_STATUS: u16 = 1005;

/// Abnormal closure. Never sent on the wire; reported locally when the
/// stream ends without a close frame or the connect attempt fails.
pub const WS_CLOSE_ABNORMAL: u16 = 1006;

/// Client-side close signalling "reconnect with new credentials".
pub const WS_CLOSE_TOKEN_CHANGED: u16 = 4000;

/// Server-side rejection. Terminal, no reconnect.
pub const WS_CLOSE_REJECTED: u16 = 4001;

/// Default chat endpoint path.
pub const CHAT_PATH: &str = "/api/chat";

/// Host the desktop shell serves the API on.
pub const DESKTOP_HOST: &str = "127.0.0.1:9375";

/// Query parameter carrying the bearer token.
pub const TOKEN_PARAM: &str = "token";

/// Query parameter carrying the session to resume.
pub const SESSION_PARAM: &str = "sessionId";

/// Largest inbound frame accepted (history replays can be large).
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Inbound message type names.
pub mod kinds {
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "Error";
    pub const SYSTEM: &str = "system";
    pub const SESSION_CREATED: &str = "session_created";
    pub const SESSION_SWITCHED: &str = "session_switched";
    pub const HISTORY: &str = "history";
    pub const HISTORY_COMPLETE: &str = "history_complete";
    pub const THINKING: &str = "Thinking";
    pub const CONTENT: &str = "Content";
    pub const TOOL_CALL_START: &str = "ToolCallStart";
    pub const TOOL_CALL_END: &str = "ToolCallEnd";
    pub const INTENT: &str = "Intent";
    pub const PLAN: &str = "Plan";
    pub const PROGRESS: &str = "Progress";
    pub const HEARTBEAT: &str = "Heartbeat";
    pub const WARNING: &str = "Warning";
    pub const RESPONSE: &str = "response";
    pub const END: &str = "end";
    pub const DEVICE_UPDATE: &str = "device_update";
}

/// Returns `true` for close codes after which the client must not reconnect.
pub fn is_terminal_close(code: u16) -> bool {
    matches!(code, WS_CLOSE_NORMAL | WS_CLOSE_REJECTED)
}
