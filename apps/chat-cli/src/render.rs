//! Turns server events and connection state into terminal output.

use std::io::Write;
use std::sync::Mutex;

use neomind_chat_connection::ConnectionState;
use neomind_protocol::ServerMessage;
use neomind_protocol::constants::kinds;

/// What a server message contributes to the transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// A streamed chunk of the assistant's answer, printed inline.
    Text(String),
    /// The model is reasoning; shown once per turn.
    Thinking,
    /// The turn is over.
    End,
    /// A timestamped side note.
    Note(String),
}

pub fn classify(msg: &ServerMessage) -> Option<Output> {
    let out = match msg.kind.as_str() {
        kinds::CONTENT => Output::Text(msg.content()?.to_string()),
        kinds::THINKING => Output::Thinking,
        kinds::END => Output::End,
        kinds::RESPONSE => Output::Note(msg.content().or(msg.message())?.to_string()),
        kinds::SYSTEM => Output::Note(msg.message().or(msg.content())?.to_string()),
        kinds::SESSION_CREATED => Output::Note(format!("new session {}", msg.session_id.as_deref()?)),
        kinds::SESSION_SWITCHED => {
            Output::Note(format!("switched to session {}", msg.session_id.as_deref()?))
        }
        kinds::TOOL_CALL_START => {
            Output::Note(format!("tool {} started", msg.str_field("tool").unwrap_or("?")))
        }
        kinds::TOOL_CALL_END => {
            let ok = msg.fields.get("success").and_then(|v| v.as_bool()).unwrap_or(true);
            let tool = msg.str_field("tool").unwrap_or("?");
            Output::Note(if ok {
                format!("tool {tool} finished")
            } else {
                format!("tool {tool} failed")
            })
        }
        kinds::INTENT => Output::Note(format!(
            "intent: {}",
            msg.str_field("displayName")
                .or(msg.str_field("category"))
                .unwrap_or("unknown")
        )),
        kinds::PLAN => Output::Note(format!("plan: {}", msg.str_field("step")?)),
        kinds::PROGRESS => Output::Note(msg.message()?.to_string()),
        kinds::WARNING => Output::Note(format!("warning: {}", msg.message()?)),
        kinds::ERROR => Output::Note(format!("error: {}", msg.message().unwrap_or("unknown"))),
        _ => return None,
    };
    Some(out)
}

pub fn state_line(state: &ConnectionState, max_attempts: u32) -> String {
    match state {
        ConnectionState::Connected => "connected".into(),
        ConnectionState::Disconnected => "disconnected".into(),
        ConnectionState::Reconnecting {
            attempt,
            seconds_remaining,
        } => format!("reconnecting in {seconds_remaining}s (attempt {attempt}/{max_attempts})"),
        ConnectionState::Error { message } => format!("error: {message}"),
    }
}

#[derive(Default)]
struct Turn {
    mid_line: bool,
    thinking_shown: bool,
}

/// Writes to stdout, keeping streamed text and notes on separate lines.
#[derive(Default)]
pub struct Printer {
    turn: Mutex<Turn>,
}

impl Printer {
    pub fn print(&self, out: Output) {
        let mut turn = self.turn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stdout = std::io::stdout().lock();
        match out {
            Output::Text(text) => {
                let _ = write!(stdout, "{text}");
                turn.mid_line = true;
            }
            Output::End => {
                if turn.mid_line {
                    let _ = writeln!(stdout);
                }
                *turn = Turn::default();
            }
            Output::Thinking => {
                if !turn.thinking_shown {
                    turn.thinking_shown = true;
                    Self::note_line(&mut stdout, &mut turn, "thinking...");
                }
            }
            Output::Note(text) => Self::note_line(&mut stdout, &mut turn, &text),
        }
        let _ = stdout.flush();
    }

    pub fn note(&self, text: &str) {
        self.print(Output::Note(text.to_string()));
    }

    fn note_line(stdout: &mut impl Write, turn: &mut Turn, text: &str) {
        if turn.mid_line {
            let _ = writeln!(stdout);
            turn.mid_line = false;
        }
        let now = chrono::Local::now().format("%H:%M:%S");
        let _ = writeln!(stdout, "[{now}] {text}");
    }
}
