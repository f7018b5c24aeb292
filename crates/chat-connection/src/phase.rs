//! Connection lifecycle as a tagged state machine.
//!
//! The reconnect-attempt counter and the "stop reconnecting" reasons live
//! inside the variants, so combinations like "backing off while manually
//! disconnected" cannot be represented.

use std::time::Duration;

use neomind_protocol::constants::{WS_CLOSE_REJECTED, WS_CLOSE_TOKEN_CHANGED, is_terminal_close};

use crate::types::ReconnectConfig;

/// Why automatic reconnection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Halt {
    /// `disconnect()` was called.
    Manual,
    /// The server closed normally.
    Closed,
    /// The server rejected the connection (close code 4001).
    Rejected,
    /// `max_attempts` consecutive attempts failed.
    Exhausted,
    /// The server reported an authentication error.
    AuthFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Nothing attempted yet, or reset by `manual_reconnect`.
    Idle,
    /// No token available; polling the provider.
    AwaitingToken,
    /// A transport is opening. `attempts` counts consecutive failures
    /// before this attempt.
    Connecting { attempts: u32 },
    Open,
    /// Waiting before attempt number `attempt`.
    Backoff { attempt: u32, seconds_remaining: u64 },
    Halted(Halt),
}

/// What to do after a transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseAction {
    Halt(Halt),
    /// Go through backoff; `immediate` skips the delay for this attempt.
    Retry { immediate: bool },
}

/// Outcome of asking for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    /// Reconnection is switched off for this phase.
    Suppressed,
    /// The attempt budget is spent.
    Exhausted,
    /// Try again after `delay`; this will be attempt number `attempt`.
    After { attempt: u32, delay: Duration },
}

impl Phase {
    /// Consecutive failed attempts so far.
    pub(crate) fn attempts(&self) -> u32 {
        match self {
            Phase::Connecting { attempts } => *attempts,
            Phase::Backoff { attempt, .. } => *attempt,
            _ => 0,
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        matches!(self, Phase::Halted(_))
    }

    pub(crate) fn next_retry(&self, config: &ReconnectConfig) -> Retry {
        if self.is_halted() {
            return Retry::Suppressed;
        }
        let attempts = self.attempts();
        if attempts >= config.max_attempts {
            return Retry::Exhausted;
        }
        Retry::After {
            attempt: attempts + 1,
            delay: config.delay_for_attempt(attempts),
        }
    }

    /// Countdown tick. Returns the new remaining seconds while backing off.
    pub(crate) fn tick(&mut self) -> Option<(u32, u64)> {
        match self {
            Phase::Backoff {
                attempt,
                seconds_remaining,
            } => {
                *seconds_remaining = seconds_remaining.saturating_sub(1);
                Some((*attempt, *seconds_remaining))
            }
            _ => None,
        }
    }

    /// The backoff timer fired: the pending attempt starts.
    pub(crate) fn begin_attempt(&mut self) {
        if let Phase::Backoff { attempt, .. } = *self {
            *self = Phase::Connecting { attempts: attempt };
        }
    }
}

/// Maps a close code to the reconnect policy.
pub(crate) fn on_close(code: u16) -> CloseAction {
    if !is_terminal_close(code) {
        CloseAction::Retry {
            immediate: code == WS_CLOSE_TOKEN_CHANGED,
        }
    } else if code == WS_CLOSE_REJECTED {
        CloseAction::Halt(Halt::Rejected)
    } else {
        CloseAction::Halt(Halt::Closed)
    }
}
