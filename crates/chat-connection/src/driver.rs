//! The task that owns a client's connection.
//!
//! Every mutation of the transport handle, pending queue, phase and timers
//! happens here, one command or event at a time. Public [`crate::ChatClient`]
//! methods only post [`Command`]s.

use std::future::pending;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, Sleep};
use tracing::{debug, info, trace, warn};
use url::Url;

use neomind_protocol::constants::{WS_CLOSE_NORMAL, WS_CLOSE_TOKEN_CHANGED};
use neomind_protocol::{Inbound, ProtocolAdapter, ServerMessage};

use crate::config::{ClientConfig, with_credentials};
use crate::observers::Observers;
use crate::phase::{self, CloseAction, Halt, Phase, Retry};
use crate::queue::PendingQueue;
use crate::token::TokenProvider;
use crate::transport::{EventSender, ReadSettings, Transport, TransportEvent};
use crate::types::{AuthFailure, ConnectionState, ConnectionStatus, ReconnectConfig};

/// Longest excerpt of a malformed frame written to the log.
const LOG_EXCERPT_CHARS: usize = 120;

pub(crate) enum Command {
    Connect { session_id: Option<String> },
    Send(String),
    Disconnect,
    ManualReconnect,
    Shutdown,
}

/// Observer registries and snapshots read by the client handle.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) state: Observers<ConnectionState>,
    pub(crate) connection: Observers<ConnectionStatus>,
    pub(crate) messages: Observers<ServerMessage>,
    pub(crate) auth_failures: Observers<AuthFailure>,
    pub(crate) session_id: Arc<Mutex<Option<String>>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: Observers::retaining(ConnectionState::Disconnected),
            connection: Observers::retaining(ConnectionStatus {
                connected: false,
                is_reconnect: false,
            }),
            messages: Observers::new(),
            auth_failures: Observers::new(),
            session_id: Arc::new(Mutex::new(None)),
        }
    }
}

/// One slot per timer kind; a new timer always replaces the old one.
#[derive(Default)]
struct Timers {
    token_poll: Option<Interval>,
    countdown: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
    auth_notice: Option<Pin<Box<Sleep>>>,
}

impl Timers {
    fn cancel_retry(&mut self) {
        self.countdown = None;
        self.reconnect = None;
    }

    fn cancel_all(&mut self) {
        self.cancel_retry();
        self.token_poll = None;
        self.auth_notice = None;
    }
}

fn every(period: Duration) -> Interval {
    tokio::time::interval_at(Instant::now() + period, period)
}

async fn tick(slot: &mut Option<Interval>) {
    match slot {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn fire(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

pub(crate) struct Driver {
    config: ClientConfig,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
    adapter: Arc<dyn ProtocolAdapter>,
    shared: Shared,
    events_tx: EventSender,
    transport: Option<Transport>,
    generation: u64,
    session_id: Option<String>,
    phase: Phase,
    queue: PendingQueue<String>,
    ever_opened: bool,
    timers: Timers,
    pending_auth_failure: Option<AuthFailure>,
}

impl Driver {
    pub(crate) fn new(
        config: ClientConfig,
        base_url: Url,
        tokens: Arc<dyn TokenProvider>,
        adapter: Arc<dyn ProtocolAdapter>,
        shared: Shared,
        events_tx: EventSender,
    ) -> Self {
        let queue = PendingQueue::new(config.queue_capacity);
        Self {
            config,
            base_url,
            tokens,
            adapter,
            shared,
            events_tx,
            transport: None,
            generation: 0,
            session_id: None,
            phase: Phase::Idle,
            queue,
            ever_opened: false,
            timers: Timers::default(),
            pending_auth_failure: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle_command(cmd).is_break() {
                        break;
                    }
                }
                Some((generation, event)) = events.recv() => {
                    self.handle_event(generation, event);
                }
                () = fire(&mut self.timers.reconnect) => self.reconnect_due(),
                () = tick(&mut self.timers.countdown) => self.countdown_tick(),
                () = tick(&mut self.timers.token_poll) => self.poll_token(),
                () = fire(&mut self.timers.auth_notice) => self.auth_notice_due(),
            }
        }
        self.teardown();
    }

    fn handle_command(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::Connect { session_id } => {
                if let Some(id) = session_id {
                    self.set_session(id);
                }
                self.connect();
            }
            Command::Send(text) => self.send(text),
            Command::Disconnect => self.disconnect(),
            Command::ManualReconnect => self.manual_reconnect(),
            Command::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn handle_event(&mut self, generation: u64, event: TransportEvent) {
        let live = self.transport.as_ref().map(Transport::generation);
        if live != Some(generation) {
            trace!(generation, ?live, "ignoring event from retired transport");
            return;
        }

        match event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Text(text) => self.on_text(&text),
            TransportEvent::Error(error) => self.on_error(&error),
            TransportEvent::Closed { code, reason } => {
                let was_open = self.transport.take().is_some_and(|t| t.is_open());
                self.on_close(code, &reason, was_open);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connect
    // -----------------------------------------------------------------------

    fn connect(&mut self) {
        let Some(token) = self.tokens.current_token() else {
            self.await_token();
            return;
        };
        self.timers.token_poll = None;

        if let Some(t) = &self.transport {
            if t.token() == token {
                debug!(generation = t.generation(), "already connected or connecting");
                return;
            }
            if t.is_open() {
                info!("token changed, cycling connection");
                if let Some(old) = self.transport.take() {
                    old.close(WS_CLOSE_TOKEN_CHANGED, "token changed");
                }
                self.on_close(WS_CLOSE_TOKEN_CHANGED, "token changed", true);
                return;
            }
        }

        self.open_transport(token);
    }

    fn open_transport(&mut self, token: String) {
        if let Some(old) = self.transport.take() {
            old.close(WS_CLOSE_NORMAL, "replaced");
        }

        self.generation += 1;
        let url = with_credentials(&self.base_url, &token, self.session_id.as_deref());
        let attempts = self.phase.attempts();
        self.phase = Phase::Connecting { attempts };

        debug!(
            generation = self.generation,
            attempts,
            session = ?self.session_id,
            "connecting"
        );
        self.transport = Some(Transport::open(
            url,
            token,
            self.generation,
            ReadSettings {
                idle_timeout: self.config.idle_timeout(),
                max_message_size: self.config.max_message_size,
            },
            self.events_tx.clone(),
        ));
    }

    fn await_token(&mut self) {
        if self.phase == Phase::AwaitingToken {
            return;
        }
        info!("no auth token available, waiting for one");

        let was_open = self.retire_transport("no token");
        self.timers.cancel_retry();
        self.phase = Phase::AwaitingToken;
        self.set_state(ConnectionState::Disconnected);
        if was_open {
            self.notify_disconnected();
        }
        self.timers.token_poll = Some(every(self.config.token_poll_interval()));
    }

    fn poll_token(&mut self) {
        if self.tokens.current_token().is_some() {
            debug!("auth token available");
            self.timers.token_poll = None;
            self.phase = Phase::Idle;
            self.connect();
        }
    }

    // -----------------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------------

    fn on_open(&mut self) {
        let Some(t) = self.transport.as_mut() else {
            return;
        };
        t.mark_open();

        let is_reconnect = self.ever_opened;
        self.ever_opened = true;
        self.phase = Phase::Open;
        self.timers.cancel_retry();

        info!(is_reconnect, session = ?self.session_id, "connected");
        self.set_state(ConnectionState::Connected);
        self.shared.connection.publish(ConnectionStatus {
            connected: true,
            is_reconnect,
        });
        self.flush_queue();
    }

    fn on_text(&mut self, text: &str) {
        match self.adapter.classify(text) {
            Inbound::Malformed(e) => {
                let excerpt: String = text.chars().take(LOG_EXCERPT_CHARS).collect();
                debug!(error = %e, %excerpt, "dropping malformed message");
            }
            Inbound::Heartbeat => {
                if let Some(t) = self.transport.as_ref().filter(|t| t.is_open()) {
                    trace!("answering heartbeat");
                    let _ = t.send_text(self.adapter.heartbeat_reply());
                }
            }
            Inbound::AuthFailure(message) => self.on_auth_failure(message),
            Inbound::Message(msg) => {
                if let Some(id) = msg.announced_session() {
                    debug!(session = id, kind = %msg.kind, "session updated by server");
                    self.set_session(id.to_string());
                }
                self.shared.messages.emit(&msg);
            }
        }
    }

    fn on_error(&mut self, error: &str) {
        warn!(%error, "transport error");
        self.set_state(ConnectionState::Error {
            message: "connection error".into(),
        });
    }

    fn on_close(&mut self, code: u16, reason: &str, was_open: bool) {
        if was_open {
            self.notify_disconnected();
        }

        match phase::on_close(code) {
            CloseAction::Halt(halt) => {
                info!(code, %reason, ?halt, "connection closed, not reconnecting");
                self.queue.clear();
                self.timers.cancel_retry();
                self.phase = Phase::Halted(halt);
                self.set_state(ConnectionState::Disconnected);
            }
            CloseAction::Retry { immediate } => {
                info!(code, %reason, immediate, "connection lost");
                self.schedule_reconnect(immediate);
            }
        }
    }

    fn on_auth_failure(&mut self, message: String) {
        warn!(%message, "server rejected credentials");
        self.halt(Halt::AuthFailed, "auth failure");
        self.pending_auth_failure = Some(AuthFailure { message });
        self.timers.auth_notice = Some(Box::pin(tokio::time::sleep(
            self.config.auth_reload_delay(),
        )));
    }

    fn auth_notice_due(&mut self) {
        self.timers.auth_notice = None;
        if let Some(failure) = self.pending_auth_failure.take() {
            self.shared.auth_failures.emit(&failure);
        }
    }

    // -----------------------------------------------------------------------
    // Backoff
    // -----------------------------------------------------------------------

    /// Schedules the next attempt. `immediate` still counts the attempt
    /// but dials without waiting out the delay.
    fn schedule_reconnect(&mut self, immediate: bool) {
        let reconnect = &self.config.reconnect;
        match self.phase.next_retry(reconnect) {
            Retry::Suppressed => {
                debug!(phase = ?self.phase, "reconnect suppressed");
                self.set_state(ConnectionState::Disconnected);
            }
            Retry::Exhausted => {
                let max = reconnect.max_attempts;
                warn!(max_attempts = max, "giving up reconnecting");
                self.queue.clear();
                self.timers.cancel_retry();
                self.phase = Phase::Halted(Halt::Exhausted);
                self.set_state(ConnectionState::Error {
                    message: format!(
                        "Unable to reconnect after {max} attempts. Please reconnect manually."
                    ),
                });
            }
            Retry::After { attempt, delay } => {
                let delay = if immediate { Duration::ZERO } else { delay };
                let seconds_remaining = ReconnectConfig::countdown_secs(delay);
                info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnecting"
                );
                self.phase = Phase::Backoff {
                    attempt,
                    seconds_remaining,
                };
                self.set_state(ConnectionState::Reconnecting {
                    attempt,
                    seconds_remaining,
                });
                self.timers.countdown =
                    (seconds_remaining > 0).then(|| every(Duration::from_secs(1)));
                self.timers.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
            }
        }
    }

    fn countdown_tick(&mut self) {
        match self.phase.tick() {
            Some((attempt, seconds_remaining)) => self.set_state(ConnectionState::Reconnecting {
                attempt,
                seconds_remaining,
            }),
            None => self.timers.countdown = None,
        }
    }

    fn reconnect_due(&mut self) {
        self.timers.cancel_retry();
        self.phase.begin_attempt();
        debug!(attempts = self.phase.attempts(), "backoff elapsed");
        self.connect();
    }

    // -----------------------------------------------------------------------
    // User commands
    // -----------------------------------------------------------------------

    fn send(&mut self, text: String) {
        let text = match self.transport.as_ref().filter(|t| t.is_open()) {
            Some(t) => match t.send_text(text) {
                Ok(()) => return,
                Err(text) => text,
            },
            None => text,
        };

        if let Some(evicted) = self.queue.push(text) {
            debug!(
                dropped_bytes = evicted.len(),
                capacity = self.queue.capacity(),
                "pending queue full, dropped oldest message"
            );
        }
        trace!(queued = self.queue.len(), "message queued while offline");
    }

    fn flush_queue(&mut self) {
        let Some(t) = self.transport.as_ref().filter(|t| t.is_open()) else {
            return;
        };
        if self.queue.is_empty() {
            return;
        }

        let pending: Vec<String> = self.queue.drain().collect();
        let total = pending.len();
        let mut sent = 0;
        let mut rest = pending.into_iter();
        for text in rest.by_ref() {
            if let Err(text) = t.send_text(text) {
                self.queue.push(text);
                break;
            }
            sent += 1;
        }
        for text in rest {
            self.queue.push(text);
        }
        debug!(sent, total, "flushed pending messages");
    }

    fn disconnect(&mut self) {
        info!("disconnect requested");
        self.halt(Halt::Manual, "client disconnect");
    }

    fn manual_reconnect(&mut self) {
        info!("manual reconnect requested");
        self.timers.cancel_all();
        self.pending_auth_failure = None;
        if self.retire_transport("manual reconnect") {
            self.notify_disconnected();
        }
        self.phase = Phase::Idle;
        self.connect();
    }

    fn teardown(&mut self) {
        self.timers.cancel_all();
        self.pending_auth_failure = None;
        if self.retire_transport("shutdown") {
            self.notify_disconnected();
            self.set_state(ConnectionState::Disconnected);
        }
        debug!("connection driver stopped");
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Stops everything and parks the connection in `Halted(halt)`.
    fn halt(&mut self, halt: Halt, reason: &str) {
        self.timers.cancel_all();
        let was_open = self.retire_transport(reason);
        self.queue.clear();
        self.phase = Phase::Halted(halt);
        self.set_state(ConnectionState::Disconnected);
        if was_open {
            self.notify_disconnected();
        }
    }

    /// Closes and drops the transport, if any. Returns whether it was open.
    fn retire_transport(&mut self, reason: &str) -> bool {
        match self.transport.take() {
            Some(t) => {
                let was_open = t.is_open();
                t.close(WS_CLOSE_NORMAL, reason);
                was_open
            }
            None => false,
        }
    }

    fn set_session(&mut self, id: String) {
        *self
            .shared
            .session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        self.session_id = Some(id);
    }

    /// Publishes a state unless it equals the current one.
    fn set_state(&self, state: ConnectionState) {
        if self.shared.state.current().as_ref() == Some(&state) {
            return;
        }
        self.shared.state.publish(state);
    }

    fn notify_disconnected(&self) {
        self.shared.connection.publish(ConnectionStatus {
            connected: false,
            is_reconnect: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use neomind_protocol::NeoMindProtocol;

    use crate::token::SharedToken;

    fn driver(config: ClientConfig) -> (Driver, mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let base_url = config.endpoint.base_url().unwrap();
        let driver = Driver::new(
            config,
            base_url,
            Arc::new(SharedToken::default()),
            Arc::new(NeoMindProtocol),
            Shared::new(),
            events_tx,
        );
        (driver, events_rx)
    }

    fn state(d: &Driver) -> ConnectionState {
        d.shared.state.current().unwrap()
    }

    #[tokio::test]
    async fn offline_sends_queue_with_drop_oldest() {
        let (mut d, _events) = driver(ClientConfig {
            queue_capacity: 2,
            ..ClientConfig::default()
        });
        for text in ["a", "b", "c"] {
            d.send(text.into());
        }
        assert_eq!(d.queue.drain().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn backoff_delays_follow_attempts() {
        tokio::time::pause();
        let (mut d, _events) = driver(ClientConfig::default());

        let mut seen = Vec::new();
        d.phase = Phase::Open;
        for _ in 0..7 {
            d.schedule_reconnect(false);
            match state(&d) {
                ConnectionState::Reconnecting {
                    attempt,
                    seconds_remaining,
                } => seen.push((attempt, seconds_remaining)),
                other => panic!("unexpected state {other:?}"),
            }
            assert!(d.timers.reconnect.is_some());
            assert!(d.timers.countdown.is_some());
            d.phase.begin_attempt();
        }
        assert_eq!(
            seen,
            vec![(1, 1), (2, 2), (3, 4), (4, 8), (5, 16), (6, 30), (7, 30)]
        );
    }

    #[tokio::test]
    async fn countdown_ticks_toward_zero() {
        tokio::time::pause();
        let (mut d, _events) = driver(ClientConfig::default());
        d.phase = Phase::Connecting { attempts: 2 };
        d.schedule_reconnect(false);
        assert_eq!(
            state(&d),
            ConnectionState::Reconnecting {
                attempt: 3,
                seconds_remaining: 4
            }
        );

        d.countdown_tick();
        assert_eq!(
            state(&d),
            ConnectionState::Reconnecting {
                attempt: 3,
                seconds_remaining: 3
            }
        );
    }

    #[tokio::test]
    async fn exhaustion_sets_error_and_clears_work() {
        let (mut d, _events) = driver(ClientConfig::default());
        d.send("stale".into());
        d.phase = Phase::Connecting { attempts: 10 };
        d.schedule_reconnect(false);

        assert_eq!(
            state(&d),
            ConnectionState::Error {
                message: "Unable to reconnect after 10 attempts. Please reconnect manually."
                    .into()
            }
        );
        assert!(d.queue.is_empty());
        assert!(d.timers.reconnect.is_none());
        assert_eq!(d.phase, Phase::Halted(Halt::Exhausted));
    }

    #[tokio::test]
    async fn disconnect_suppresses_later_close() {
        let (mut d, _events) = driver(ClientConfig::default());
        d.send("queued".into());
        d.disconnect();
        assert!(d.queue.is_empty());
        assert_eq!(state(&d), ConnectionState::Disconnected);

        d.on_close(WS_CLOSE_TOKEN_CHANGED, "late close", false);
        assert_eq!(d.phase, Phase::Halted(Halt::Manual));
        assert!(d.timers.reconnect.is_none());
    }

    #[tokio::test]
    async fn missing_token_starts_polling_once() {
        let (mut d, _events) = driver(ClientConfig::default());
        d.connect();
        assert_eq!(d.phase, Phase::AwaitingToken);
        assert!(d.timers.token_poll.is_some());
        assert!(d.transport.is_none());

        let states = Arc::new(Mutex::new(0));
        let s = states.clone();
        let _sub = d.shared.state.subscribe(move |_| *s.lock().unwrap() += 1);
        d.connect();
        // Only the replay on subscribe; no new transition.
        assert_eq!(*states.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn events_from_retired_generations_are_ignored() {
        let (mut d, _events) = driver(ClientConfig::default());
        d.handle_event(3, TransportEvent::Opened);
        d.handle_event(3, TransportEvent::Error("boom".into()));
        assert_eq!(state(&d), ConnectionState::Disconnected);
        assert_eq!(d.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn session_announcement_updates_shared_id() {
        let (mut d, _events) = driver(ClientConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = d
            .shared
            .messages
            .subscribe(move |m: &ServerMessage| s.lock().unwrap().push(m.session_id.clone()));

        d.on_text(r#"{"type":"session_created","sessionId":"s1"}"#);
        d.on_text(r#"{"type":"ping","timestamp":1}"#);
        d.on_text("{broken");

        assert_eq!(*seen.lock().unwrap(), vec![Some("s1".to_string())]);
        assert_eq!(d.session_id.as_deref(), Some("s1"));
        assert_eq!(
            d.shared.session_id.lock().unwrap().as_deref(),
            Some("s1")
        );
    }

    #[tokio::test]
    async fn auth_failure_halts_and_defers_notice() {
        let (mut d, _events) = driver(ClientConfig::default());
        d.on_text(r#"{"type":"Error","message":"Authentication required. Provide a valid JWT token."}"#);

        assert_eq!(d.phase, Phase::Halted(Halt::AuthFailed));
        assert!(d.timers.auth_notice.is_some());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = d
            .shared
            .auth_failures
            .subscribe(move |f: &AuthFailure| s.lock().unwrap().push(f.message.clone()));
        d.auth_notice_due();
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(d.pending_auth_failure.is_none());
    }

    #[tokio::test]
    async fn token_change_retries_without_delay() {
        tokio::time::pause();
        let (mut d, _events) = driver(ClientConfig::default());
        d.phase = Phase::Open;
        d.on_close(WS_CLOSE_TOKEN_CHANGED, "token changed", true);

        assert_eq!(
            state(&d),
            ConnectionState::Reconnecting {
                attempt: 1,
                seconds_remaining: 0
            }
        );
        assert!(d.timers.countdown.is_none());
        let deadline = d.timers.reconnect.as_ref().unwrap().deadline();
        assert!(deadline <= Instant::now());
    }

    #[tokio::test]
    async fn abnormal_close_keeps_base_delay() {
        tokio::time::pause();
        let (mut d, _events) = driver(ClientConfig::default());
        d.phase = Phase::Open;
        d.on_close(1006, "stream ended", true);

        assert_eq!(
            state(&d),
            ConnectionState::Reconnecting {
                attempt: 1,
                seconds_remaining: 1
            }
        );
        assert!(d.timers.countdown.is_some());
    }

    #[tokio::test]
    async fn shutdown_command_stops_the_loop() {
        let (mut d, _events) = driver(ClientConfig::default());
        assert!(d.handle_command(Command::Disconnect).is_continue());
        assert!(d.handle_command(Command::Shutdown).is_break());
    }

    #[tokio::test]
    async fn run_returns_on_shutdown() {
        let (d, events) = driver(ClientConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Command::Send("queued".into())).unwrap();
        tx.send(Command::Shutdown).unwrap();
        tokio::time::timeout(Duration::from_secs(1), d.run(rx, events))
            .await
            .unwrap();
    }
}
