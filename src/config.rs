//! Configuration loading.
//!
//! Reads the podpipe configuration file and applies environment overrides.
//! The bearer token is never read from or written to disk; it comes from
//! `PODPIPE_TOKEN` only.

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_CONNECT_TIMEOUT, READ_BUFFER_SIZE};

/// File name inside the configuration directory.
const CONFIG_FILE: &str = "config.json";

/// Configuration for cluster sessions and the CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the cluster API server.
    pub server_url: String,
    /// Namespace that pod names are resolved in.
    pub namespace: String,
    /// Bearer token - NOT serialized to disk (env only).
    #[serde(skip)]
    pub token: String,
    /// Buffer size used when streaming raw output.
    pub read_buffer_size: usize,
    /// Upper bound on the WebSocket handshake, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "https://127.0.0.1:6443".to_string(),
            namespace: "default".to_string(),
            token: String::new(),
            read_buffer_size: READ_BUFFER_SIZE,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// Directory selection priority:
    /// 1. `PODPIPE_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir joined with `podpipe`
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("PODPIPE_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("podpipe"))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_dir(&Self::config_dir()?);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir`, or defaults if it is missing or invalid.
    pub fn load_from_dir(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        match Self::read_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring config file {}: {e:#}", path.display());
                Self::default()
            }
        }
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).context("Invalid config JSON")
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `PODPIPE_SERVER`, `PODPIPE_NAMESPACE` and `PODPIPE_TOKEN`
    /// as returned by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("PODPIPE_SERVER") {
            self.server_url = server_url;
        }
        if let Some(namespace) = lookup("PODPIPE_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(token) = lookup("PODPIPE_TOKEN") {
            self.token = token;
        }
    }

    /// Check if a bearer token is configured.
    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    /// Handshake timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Pretty JSON for display, with the token shown only as redacted.
    pub fn to_display_json(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            let token = if self.has_token() { "<redacted>" } else { "<unset>" };
            map.insert("token".to_string(), serde_json::Value::from(token));
        }
        Ok(serde_json::to_string_pretty(&value)?)
    }
}
