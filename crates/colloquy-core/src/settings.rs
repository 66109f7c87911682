//! Credential store: per-provider API keys with a load/save lifecycle.
//!
//! The engine only ever reads credentials synchronously at send time via
//! [`CredentialProvider`]; the store itself is a small file-backed state
//! machine (loading flag, last error, tokens) owned by the application
//! root.

use std::fs;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::provider::Provider;

/// Per-provider API keys. An empty string means no key is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    #[serde(default)]
    pub chatgpt: String,
    #[serde(default)]
    pub claude: String,
    #[serde(default)]
    pub gemini: String,
}

impl Tokens {
    pub fn get(&self, provider: Provider) -> &str {
        match provider {
            Provider::ChatGpt => &self.chatgpt,
            Provider::Claude => &self.claude,
            Provider::Gemini => &self.gemini,
        }
    }

    fn set(&mut self, provider: Provider, value: String) {
        match provider {
            Provider::ChatGpt => self.chatgpt = value,
            Provider::Claude => self.claude = value,
            Provider::Gemini => self.gemini = value,
        }
    }
}

/// Read-side contract the synchronization engine depends on.
pub trait CredentialProvider: Send + Sync {
    /// Current API key for the provider, if one is configured.
    fn token_for(&self, provider: Provider) -> Option<String>;
}

#[derive(Debug, Clone)]
struct SettingsState {
    tokens: Tokens,
    should_save: bool,
    loading: bool,
    error: Option<String>,
}

impl Default for SettingsState {
    fn default() -> Self {
        Self {
            tokens: Tokens::default(),
            should_save: true,
            loading: false,
            error: None,
        }
    }
}

/// File-backed settings store. The on-disk payload is the JSON form of
/// [`Tokens`].
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    state: RwLock<SettingsState>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: RwLock::new(SettingsState::default()),
        }
    }

    /// Store at the platform config location
    /// (`<config_dir>/colloquy/settings.json`).
    pub fn at_default_path() -> Result<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            Error::Configuration("could not determine config directory".to_string())
        })?;
        Ok(Self::new(config_dir.join("colloquy").join("settings.json")))
    }

    /// Load tokens from disk. A missing file yields defaults; a
    /// malformed one records the failure in `error` and keeps whatever
    /// tokens were already in memory. When saving is disabled the load
    /// is skipped entirely.
    pub fn load(&self) {
        {
            let mut state = self.write_state();
            if !state.should_save {
                state.loading = false;
                return;
            }
            state.loading = true;
            state.error = None;
        }

        let outcome = match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str::<Tokens>(&raw)
                .map(Some)
                .map_err(|e| format!("Failed to load API keys: {e}")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("Failed to load API keys: {e}")),
        };

        let mut state = self.write_state();
        state.loading = false;
        match outcome {
            Ok(Some(tokens)) => {
                debug!(path = %self.path.display(), "loaded API keys");
                state.tokens = tokens;
            }
            Ok(None) => debug!(path = %self.path.display(), "no settings file yet"),
            Err(message) => {
                warn!(%message, "settings load failed");
                state.error = Some(message);
            }
        }
    }

    /// Persist the current tokens. A no-op while saving is disabled.
    pub fn save(&self) -> Result<()> {
        let (tokens, should_save) = {
            let state = self.read_state();
            (state.tokens.clone(), state.should_save)
        };
        if !should_save {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&tokens)
            .map_err(|e| Error::Configuration(e.to_string()))?;
        fs::write(&self.path, payload)?;
        self.write_state().error = None;
        Ok(())
    }

    pub fn set_token(&self, provider: Provider, value: impl Into<String>) {
        self.write_state().tokens.set(provider, value.into());
    }

    /// Toggling saving off wipes tokens from memory and best-effort
    /// removes the settings file; nothing is loaded or saved until it is
    /// turned back on.
    pub fn set_should_save(&self, should_save: bool) {
        {
            let mut state = self.write_state();
            state.should_save = should_save;
            if !should_save {
                state.tokens = Tokens::default();
            }
        }
        if !should_save
            && let Err(e) = fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(error = %e, path = %self.path.display(), "failed to remove settings file");
        }
    }

    pub fn tokens(&self) -> Tokens {
        self.read_state().tokens.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.read_state().loading
    }

    pub fn error(&self) -> Option<String> {
        self.read_state().error.clone()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SettingsState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, SettingsState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialProvider for SettingsStore {
    fn token_for(&self, provider: Provider) -> Option<String> {
        let state = self.read_state();
        let token = state.tokens.get(provider).trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}
