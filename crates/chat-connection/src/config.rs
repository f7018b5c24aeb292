//! Client configuration and endpoint resolution.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use neomind_protocol::constants::{
    CHAT_PATH, DESKTOP_HOST, SESSION_PARAM, TOKEN_PARAM, WS_MAX_MESSAGE_SIZE,
};

use crate::types::ReconnectConfig;

/// Errors from configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Where the chat endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// `host[:port]` of the NeoMind server. Ignored in desktop-shell mode.
    pub host: String,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
    /// Running inside the desktop shell, which serves the API locally on a
    /// fixed port over plain `ws://`.
    pub desktop_shell: bool,
    pub path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: DESKTOP_HOST.into(),
            secure: false,
            desktop_shell: false,
            path: CHAT_PATH.into(),
        }
    }
}

impl EndpointConfig {
    /// Endpoint URL without credentials.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let (scheme, host) = if self.desktop_shell {
            ("ws", DESKTOP_HOST)
        } else if self.secure {
            ("wss", self.host.as_str())
        } else {
            ("ws", self.host.as_str())
        };
        if host.is_empty() {
            return Err(ConfigError::Invalid("endpoint host is empty".into()));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "endpoint path must start with '/': {}",
                self.path
            )));
        }
        Ok(Url::parse(&format!("{scheme}://{host}{}", self.path))?)
    }
}

/// Appends the token and optional session to a validated base URL.
pub(crate) fn with_credentials(base: &Url, token: &str, session_id: Option<&str>) -> Url {
    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair(TOKEN_PARAM, token);
        if let Some(id) = session_id.filter(|s| !s.is_empty()) {
            query.append_pair(SESSION_PARAM, id);
        }
    }
    url
}

/// Tunables for a [`crate::ChatClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Outbound messages kept while offline; the oldest is evicted beyond this.
    pub queue_capacity: usize,
    /// How often to ask the token provider again while no token is available.
    pub token_poll_interval_ms: u64,
    /// Delay between an auth failure and the auth-failure notification.
    pub auth_reload_delay_ms: u64,
    /// Silence after which the connection is considered dead.
    pub idle_timeout_secs: u64,
    pub max_message_size: usize,
    pub endpoint: EndpointConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            reconnect: ReconnectConfig::default(),
            queue_capacity: 100,
            token_poll_interval_ms: 1000,
            auth_reload_delay_ms: 1500,
            idle_timeout_secs: 75,
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.base_delay_ms must be > 0".into()));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms must be >= reconnect.base_delay_ms".into(),
            ));
        }
        if self.token_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("token_poll_interval_ms must be > 0".into()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs must be > 0".into()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be > 0".into()));
        }
        self.endpoint.base_url()?;
        Ok(())
    }

    pub fn token_poll_interval(&self) -> Duration {
        Duration::from_millis(self.token_poll_interval_ms)
    }

    pub fn auth_reload_delay(&self) -> Duration {
        Duration::from_millis(self.auth_reload_delay_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
