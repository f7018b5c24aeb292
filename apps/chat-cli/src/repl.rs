//! Parsing of REPL input lines.

use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use neomind_protocol::ChatImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain chat text.
    Say(String),
    Image { path: PathBuf, text: String },
    Disconnect,
    Reconnect,
    State,
    Help,
    Quit,
    Empty,
    /// Bad command, with the reason.
    Invalid(String),
}

pub const HELP: &str = "\
commands:
  /image <path> <text>   send text with an image attached
  /disconnect            close the connection
  /reconnect             reconnect now
  /state                 show the connection state
  /quit                  exit";

pub fn parse(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name {
        "image" => match rest.split_once(char::is_whitespace) {
            Some((path, text)) if !text.trim().is_empty() => Input::Image {
                path: PathBuf::from(path),
                text: text.trim().to_string(),
            },
            _ => Input::Invalid("usage: /image <path> <text>".into()),
        },
        "disconnect" => Input::Disconnect,
        "reconnect" => Input::Reconnect,
        "state" => Input::State,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Invalid(format!("unknown command /{other}, try /help")),
    }
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// Reads an image file into a `data:` URL attachment.
pub fn load_image(path: &Path) -> anyhow::Result<ChatImage> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mime = mime_type(path);
    Ok(ChatImage {
        data: format!("data:{mime};base64,{}", STANDARD.encode(bytes)),
        mime_type: Some(mime.to_string()),
    })
}
