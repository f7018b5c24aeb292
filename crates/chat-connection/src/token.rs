//! Bearer-token sources.
//!
//! The client never acquires or refreshes tokens itself; it only asks a
//! [`TokenProvider`] for the current one before each connect attempt.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Source of the current bearer token.
pub trait TokenProvider: Send + Sync + 'static {
    /// Returns the token to authenticate with, or `None` if the user is
    /// not logged in yet.
    fn current_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn current_token(&self) -> Option<String> {
        self()
    }
}

/// In-memory token that can be swapped at runtime, e.g. after a login.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token)),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl TokenProvider for SharedToken {
    fn current_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|t| !t.is_empty())
    }
}

/// Errors from token persistence.
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    saved_at: DateTime<Utc>,
}

/// Token persisted to a JSON file and cached in memory.
pub struct TokenStore {
    path: PathBuf,
    cached: RwLock<Option<StoredToken>>,
}

impl TokenStore {
    /// Opens the store, loading an existing token from disk.
    pub fn new(path: PathBuf) -> Result<Self, TokenStoreError> {
        let cached = load_token(&path)?;
        Ok(Self {
            path,
            cached: RwLock::new(cached),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the cached token was written, if any.
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.saved_at)
    }

    /// Saves a token and persists it.
    pub fn save(&self, token: &str) -> Result<(), TokenStoreError> {
        let stored = StoredToken {
            token: token.to_string(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&stored)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(stored);
        debug!(path = %self.path.display(), "token saved");
        Ok(())
    }

    /// Forgets the token and removes the file.
    pub fn clear(&self) -> Result<(), TokenStoreError> {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-reads the file, picking up a token written by another process.
    pub fn reload(&self) -> Result<(), TokenStoreError> {
        let loaded = load_token(&self.path)?;
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        Ok(())
    }
}

impl TokenProvider for TokenStore {
    fn current_token(&self) -> Option<String> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.token.clone())
            .filter(|t| !t.is_empty())
    }
}

fn load_token(path: &Path) -> Result<Option<StoredToken>, TokenStoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let stored: StoredToken = serde_json::from_str(&data)?;
    debug!(path = %path.display(), "token loaded");
    Ok(Some(stored))
}
