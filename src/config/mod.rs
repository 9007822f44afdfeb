//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{StoredToken, TokenStore};
use crate::realtime::RetryPolicy;

const DEFAULT_API_BASE: &str = "http://localhost:8080/api";
const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST API base URL (no trailing slash)
    pub api_base_url: String,
    /// STOMP-over-WebSocket endpoint
    pub ws_url: String,
    /// Stored bearer token
    pub token: Option<StoredToken>,
    /// Reconnect and handshake tuning
    pub realtime: RealtimeConfig,
}

/// Tuning for the realtime channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub reconnect_delay_secs: u64,
    /// Cap on automatic chat transport reconnects. The service event
    /// stream ignores this and retries forever.
    pub max_reconnect_attempts: u32,
    pub handshake_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 3,
            max_reconnect_attempts: 5,
            handshake_timeout_secs: 10,
        }
    }
}

impl RealtimeConfig {
    pub fn chat_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(
            self.max_reconnect_attempts,
            Duration::from_secs(self.reconnect_delay_secs),
        )
    }

    pub fn event_stream_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(Duration::from_secs(self.reconnect_delay_secs))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            token: None,
            realtime: RealtimeConfig::default(),
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "autocare", "autocare-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_toml(&content)
    }

    fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Config holds the bearer token
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Apply one-off URL overrides from the command line.
    pub fn with_overrides(mut self, api_url: Option<String>, ws_url: Option<String>) -> Self {
        if let Some(url) = api_url {
            self.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = ws_url {
            self.ws_url = url;
        }
        self
    }
}

impl TokenStore for Config {
    fn get_token(&self) -> Option<StoredToken> {
        self.token.clone()
    }

    fn set_token(&mut self, token: StoredToken) {
        self.token = Some(token);
    }

    fn clear_tokens(&mut self) {
        self.token = None;
    }
}
