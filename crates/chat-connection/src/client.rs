//! Public handle to a chat connection.

use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use neomind_protocol::{NeoMindProtocol, ProtocolAdapter, ServerMessage};

use crate::config::{ClientConfig, ConfigError};
use crate::driver::{Command, Driver, Shared};
use crate::observers::Subscription;
use crate::token::TokenProvider;
use crate::types::{AuthFailure, ConnectionState, ConnectionStatus};

/// Reconnecting client for the chat WebSocket.
///
/// All methods return immediately; the connection itself is driven by a
/// background task spawned in [`ChatClient::new`]. Dropping the client
/// stops that task and closes the connection.
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    shared: Shared,
    driver: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Creates a client speaking the NeoMind protocol.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ConfigError> {
        Self::with_adapter(config, tokens, Arc::new(NeoMindProtocol))
    }

    /// Creates a client with a custom protocol adapter.
    pub fn with_adapter(
        config: ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        adapter: Arc<dyn ProtocolAdapter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let base_url = config.endpoint.base_url()?;
        debug!(url = %base_url, "chat client created");

        let shared = Shared::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = Driver::new(config, base_url, tokens, adapter, shared.clone(), events_tx);
        let handle = tokio::spawn(driver.run(commands_rx, events_rx));

        Ok(Self {
            commands: commands_tx,
            shared,
            driver: Some(handle),
        })
    }

    /// Opens the connection, optionally resuming `session_id`.
    ///
    /// A no-op while a connection with the current token is open or
    /// opening. If the token changed since, the connection is cycled.
    pub fn connect(&self, session_id: Option<String>) {
        self.post(Command::Connect { session_id });
    }

    /// Serializes `payload` and sends it, queueing while offline.
    pub fn send_request<T: Serialize>(&self, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(text),
            Err(e) => warn!(error = %e, "failed to serialize request, dropping"),
        }
    }

    /// Sends a raw text frame, queueing while offline.
    pub fn send_text(&self, text: impl Into<String>) {
        self.post(Command::Send(text.into()));
    }

    /// Closes the connection and stops automatic reconnection. Queued
    /// messages are discarded.
    pub fn disconnect(&self) {
        self.post(Command::Disconnect);
    }

    /// Drops any current connection and connects again with a fresh
    /// attempt counter.
    pub fn manual_reconnect(&self) {
        self.post(Command::ManualReconnect);
    }

    /// Called for every application message from the server.
    pub fn on_message(
        &self,
        cb: impl Fn(&ServerMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.messages.subscribe(cb)
    }

    /// Called on every open and close. The current status is delivered
    /// immediately on registration.
    pub fn on_connection(
        &self,
        cb: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.connection.subscribe(cb)
    }

    /// Called on every state transition, including countdown ticks. The
    /// current state is delivered immediately on registration.
    pub fn on_state_change(
        &self,
        cb: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.state.subscribe(cb)
    }

    /// Called when the server rejects the token. The client stays
    /// disconnected; the host should refresh credentials and call
    /// [`manual_reconnect`](Self::manual_reconnect).
    pub fn on_auth_failure(
        &self,
        cb: impl Fn(&AuthFailure) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.auth_failures.subscribe(cb)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared
            .state
            .current()
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Session the next connect will resume, as last set by `connect` or
    /// announced by the server.
    pub fn session_id(&self) -> Option<String> {
        self.shared
            .session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops the background task and waits for it to close the connection.
    pub async fn shutdown(mut self) {
        self.post(Command::Shutdown);
        if let Some(handle) = self.driver.take() {
            let _ = handle.await;
        }
    }

    fn post(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            debug!("connection driver has stopped, command ignored");
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}
