//! NeoMind Chat terminal client entry point.

mod config;
mod render;
mod repl;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use neomind_chat_connection::{
    ChatClient, ConnectionState, EndpointConfig, SharedToken, TokenProvider, TokenStore,
};
use neomind_protocol::ChatRequest;

use config::ChatConfig;
use render::{Printer, classify, state_line};
use repl::Input;

const TOKEN_ENV: &str = "NEOMIND_TOKEN";

/// Terminal chat client for a NeoMind server
#[derive(Parser, Debug)]
#[command(name = "neomind-chat", version)]
#[command(about = "Chat with a NeoMind agent from the terminal")]
struct Args {
    /// Config file (default: ~/.config/neomind/chat.toml)
    #[arg(long, value_name = "path")]
    config: Option<PathBuf>,

    /// Server host[:port]
    #[arg(long)]
    host: Option<String>,

    /// Use wss:// instead of ws://
    #[arg(long)]
    secure: bool,

    /// Connect to the desktop app's local server
    #[arg(long, conflicts_with_all = ["host", "secure"])]
    desktop: bool,

    /// Resume an existing chat session
    #[arg(long)]
    session: Option<String>,

    /// Start a new session with a client-chosen id
    #[arg(long, conflicts_with = "session")]
    new_session: bool,

    /// Auth token (overrides NEOMIND_TOKEN and the token file)
    #[arg(long)]
    token: Option<String>,

    /// LLM backend to use
    #[arg(long)]
    backend: Option<String>,
}

impl Args {
    fn apply(&self, endpoint: &mut EndpointConfig, backend_id: &mut Option<String>) {
        if let Some(host) = &self.host {
            endpoint.host = host.clone();
        }
        if self.secure {
            endpoint.secure = true;
        }
        if self.desktop {
            endpoint.desktop_shell = true;
        }
        if self.backend.is_some() {
            backend_id.clone_from(&self.backend);
        }
    }

    fn initial_session(&self) -> Option<String> {
        if self.new_session {
            Some(uuid::Uuid::new_v4().to_string())
        } else {
            self.session.clone()
        }
    }
}

/// Where the token comes from.
enum Credentials {
    Fixed(SharedToken),
    Stored(Arc<TokenStore>),
}

impl Credentials {
    fn resolve(
        flag: Option<String>,
        env: Option<String>,
        token_file: &Path,
    ) -> anyhow::Result<Self> {
        if let Some(token) = flag.into_iter().chain(env).find(|t| !t.trim().is_empty()) {
            return Ok(Self::Fixed(SharedToken::new(Some(token))));
        }
        let store = TokenStore::new(token_file.to_path_buf())
            .with_context(|| format!("failed to read token file {}", token_file.display()))?;
        Ok(Self::Stored(Arc::new(store)))
    }

    fn provider(&self) -> Arc<dyn TokenProvider> {
        match self {
            Self::Fixed(token) => Arc::new(token.clone()),
            Self::Stored(store) => store.clone(),
        }
    }

    /// Re-reads the token file. Returns whether the token changed.
    fn refresh(&self) -> bool {
        let Self::Stored(store) = self else {
            return false;
        };
        let before = store.current_token();
        if let Err(e) = store.reload() {
            tracing::warn!(error = %e, path = %store.path().display(), "failed to reload token");
            return false;
        }
        let after = store.current_token();
        after.is_some() && after != before
    }
}

enum UiEvent {
    AuthFailed(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they never interleave with the transcript.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting NeoMind Chat");

    let mut config = match ChatConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            ChatConfig::default()
        }
    };
    args.apply(&mut config.client.endpoint, &mut config.backend_id);

    let credentials = Credentials::resolve(
        args.token.clone(),
        std::env::var(TOKEN_ENV).ok(),
        &config.token_file,
    )?;
    let max_attempts = config.client.reconnect.max_attempts;
    let client = ChatClient::new(config.client.clone(), credentials.provider())?;

    let printer = Arc::new(Printer::default());
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();

    let p = printer.clone();
    let _messages = client.on_message(move |msg| {
        if let Some(out) = classify(msg) {
            p.print(out);
        } else {
            tracing::debug!(kind = %msg.kind, "not rendered");
        }
    });
    let p = printer.clone();
    let _states = client.on_state_change(move |state| p.note(&state_line(state, max_attempts)));
    let _auth = client.on_auth_failure(move |failure| {
        let _ = ui_tx.send(UiEvent::AuthFailed(failure.message.clone()));
    });

    if matches!(credentials, Credentials::Stored(_)) && credentials.provider().current_token().is_none()
    {
        printer.note(&format!(
            "no token yet: set {TOKEN_ENV}, pass --token, or write {}",
            config.token_file.display()
        ));
    }
    client.connect(args.initial_session());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            Some(event) = ui_rx.recv() => match event {
                UiEvent::AuthFailed(message) => {
                    printer.note(&format!("authentication failed: {message}"));
                    if credentials.refresh() {
                        printer.note("token file changed, reconnecting");
                        client.manual_reconnect();
                    } else {
                        printer.note("update the token, then /reconnect");
                    }
                }
            },

            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&client, &printer, &line, config.backend_id.as_deref(), max_attempts) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Handles one REPL line. Returns `false` to quit.
fn handle_line(
    client: &ChatClient,
    printer: &Printer,
    line: &str,
    backend_id: Option<&str>,
    max_attempts: u32,
) -> bool {
    let request = |text: String| {
        ChatRequest::new(text)
            .in_session(client.session_id())
            .with_backend(backend_id.map(str::to_string))
    };

    match repl::parse(line) {
        Input::Say(text) => send(client, printer, &request(text)),
        Input::Image { path, text } => match repl::load_image(&path) {
            Ok(image) => send(client, printer, &request(text).with_image(image)),
            Err(e) => printer.note(&format!("{e:#}")),
        },
        Input::Disconnect => client.disconnect(),
        Input::Reconnect => client.manual_reconnect(),
        Input::State => {
            let session = client.session_id().unwrap_or_else(|| "none".into());
            printer.note(&format!(
                "{} (session {session})",
                state_line(&client.state(), max_attempts)
            ));
        }
        Input::Help => printer.note(repl::HELP),
        Input::Quit => return false,
        Input::Empty => {}
        Input::Invalid(reason) => printer.note(&reason),
    }
    true
}

fn send(client: &ChatClient, printer: &Printer, request: &ChatRequest) {
    if !matches!(client.state(), ConnectionState::Connected) {
        printer.note("offline, message queued");
    }
    client.send_request(request);
}
