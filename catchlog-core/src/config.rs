//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/catchlog/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/catchlog/` (~/.config/catchlog/)
//! - Data: `$XDG_DATA_HOME/catchlog/` (~/.local/share/catchlog/)
//! - State/Logs: `$XDG_STATE_HOME/catchlog/` (~/.local/state/catchlog/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Remote catch API
    #[serde(default)]
    pub api: ApiConfig,

    /// Offline queue draining behaviour
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote catch API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Base URL of the catch API (e.g., `https://api.example.com`)
    pub server_url: Option<String>,

    /// Bearer token for the signed-in angler
    pub api_token: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_token: None,
            timeout_secs: default_api_timeout(),
        }
    }
}

impl ApiConfig {
    /// Check if the API is configured well enough to submit catches
    pub fn is_ready(&self) -> bool {
        self.server_url.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self
            .server_url
            .as_deref()
            .ok_or_else(|| Error::Config("api.server_url is required".to_string()))?;

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "api.server_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "api.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_timeout() -> u64 {
    15
}

/// Offline queue sync configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Consecutive transient failures before an entry stops auto-retrying
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Connectivity poll interval when no push events are available
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Run a sync pass automatically when connectivity returns
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_secs: default_poll_interval(),
            auto_sync: default_auto_sync(),
        }
    }
}

impl SyncConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "sync.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 || self.poll_interval_secs > 300 {
            return Err(Error::Config(
                "sync.poll_interval_secs must be between 1 and 300".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_poll_interval() -> u64 {
    20
}

fn default_auto_sync() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.sync.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/catchlog/config.toml` (~/.config/catchlog/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("catchlog").join("config.toml")
    }

    /// Returns the data directory path (for the queue database)
    ///
    /// `$XDG_DATA_HOME/catchlog/` (~/.local/share/catchlog/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("catchlog")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/catchlog/` (~/.local/state/catchlog/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("catchlog")
    }

    /// Returns the queue database file path
    ///
    /// `$XDG_DATA_HOME/catchlog/queue.db` (~/.local/share/catchlog/queue.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("queue.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/catchlog/catchlog.log` (~/.local/state/catchlog/catchlog.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("catchlog.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
