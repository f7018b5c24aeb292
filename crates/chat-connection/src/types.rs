//! Public types for the chat connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection state as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open and authenticated.
    Connected,
    /// No transport and no reconnect scheduled.
    Disconnected,
    /// Waiting to retry after an unexpected drop.
    Reconnecting { attempt: u32, seconds_remaining: u64 },
    /// Transport error or retries exhausted.
    Error { message: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Delivered to connection observers on open and close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// `true` when an earlier transport of this client had already opened.
    pub is_reconnect: bool,
}

/// Delivered to auth-failure observers once the server has refused the
/// credential and the connection has been torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub message: String,
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-based): `min(base * 2^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Whole seconds shown in the countdown for a delay, rounded up.
    pub fn countdown_secs(delay: Duration) -> u64 {
        u64::try_from(delay.as_millis())
            .unwrap_or(u64::MAX)
            .div_ceil(1000)
    }
}
