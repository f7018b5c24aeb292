//! Terminal client configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/neomind/chat.toml`
//! - Windows: `%APPDATA%/neomind/chat.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use neomind_chat_connection::ClientConfig;

/// Terminal client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// LLM backend to request, if not the server default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,

    /// JSON file holding the login token.
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    /// Connection settings.
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_token_file() -> PathBuf {
    config_dir().join("token.json")
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            backend_id: None,
            token_file: default_token_file(),
            client: ClientConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Loads configuration from `path` (or the default location), creating
    /// a default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: ChatConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = ChatConfig::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("neomind")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config").join("neomind")
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("chat.toml")
}
