//! Settings configuration loaded from TOML files.
//!
//! Non-sensitive configuration stored in the XDG config directory
//! (~/.config/lumen/config.toml).

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::locale::Locale;

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# lumen configuration file
# Located at: ~/.config/lumen/config.toml
#
# Secrets are loaded from environment variables:
#   - LUMEN_API_KEY (optional, sent as a bearer token to the job store)

# Locale used for user-facing fallback text ("pt" or "es")
locale = "pt"

[sync]
api_base_url = "http://127.0.0.1:54321"
# push_url = "ws://127.0.0.1:54321/realtime/jobs"  # Push channel disabled when unset
poll_enabled = true
poll_interval_ms = 3000
# Per-request bound on a poll, kept below poll_interval_ms
request_timeout_ms = 2500

[loader]
max_attempts = 3
attempt_timeout_ms = 15000
fetch_timeout_ms = 10000
allow_recompression = true
max_dimension = 2000
jpeg_quality = 85
show_download_on_fail = true

[notification]
enabled = true
# command = ["paplay", "/usr/share/sounds/freedesktop/stereo/complete.oga"]

[logging]
level = "info"
"#;

/// Settings loaded from TOML configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Locale for fallback text
    #[serde(default)]
    pub locale: Locale,

    /// Job status synchronization
    #[serde(default)]
    pub sync: SyncSettings,

    /// Resilient resource loading
    #[serde(default)]
    pub loader: LoaderSettings,

    /// Terminal-status notification cue
    #[serde(default)]
    pub notification: NotificationSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Job status synchronization settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Base URL of the job store HTTP API (poll source)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// WebSocket URL of the push channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_url: Option<String>,

    /// Whether the polling fallback runs at all
    #[serde(default = "default_true")]
    pub poll_enabled: bool,

    /// Fixed polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout of a single poll request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Resilient loader settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoaderSettings {
    /// Attempt ceiling across all tiers
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-attempt load timeout in milliseconds
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Timeout for the binary fetch that feeds recompression
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Allow the fetch-and-recompress tier
    #[serde(default = "default_true")]
    pub allow_recompression: bool,

    /// Longest edge after recompression, in pixels
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// JPEG quality used when re-encoding (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Offer a download of the original when all attempts fail
    #[serde(default = "default_true")]
    pub show_download_on_fail: bool,
}

/// Notification cue settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Player command; the terminal bell is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:54321".to_string()
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    2500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_attempt_timeout_ms() -> u64 {
    15_000
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_max_dimension() -> u32 {
    2000
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            push_url: None,
            poll_enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            allow_recompression: true,
            max_dimension: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
            show_download_on_fail: true,
        }
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl LoaderSettings {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Get the configuration file path.
    ///
    /// Uses XDG config directory: `~/.config/lumen/config.toml`
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("LUMEN_CONFIG_DIR") {
            let dir = PathBuf::from(override_dir);
            return Ok(dir.join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("lumen");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &PathBuf) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, DEFAULT_CONFIG_TOML)?;

        Ok(())
    }
}
