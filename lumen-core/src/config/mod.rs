//! Configuration management for lumen.
//!
//! Secrets come from environment variables, settings from a TOML file.
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - `LUMEN_API_KEY` - job store API key (optional)
//!
//! ## Settings (TOML File)
//! Located at `~/.config/lumen/config.toml`:
//! ```toml
//! locale = "pt"
//!
//! [sync]
//! api_base_url = "http://127.0.0.1:54321"
//! poll_interval_ms = 3000
//! request_timeout_ms = 2500
//!
//! [loader]
//! max_attempts = 3
//! attempt_timeout_ms = 15000
//! allow_recompression = true
//! max_dimension = 2000
//!
//! [logging]
//! level = "info"
//! ```

mod secrets;
mod settings;

pub use secrets::{Secrets, SecretsError};
pub use settings::{
    LoaderSettings, LoggingSettings, NotificationSettings, Settings, SettingsError, SyncSettings,
};

/// Combined configuration containing both secrets and settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from TOML configuration file
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file cannot be read or parsed, or if a
    /// setting is out of range (zero intervals, zero attempts, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let secrets = Secrets::from_env()?;
        let settings = Settings::load()?;

        Self::from_parts(secrets, settings)
    }

    /// Combine already-loaded parts, validating the settings.
    pub fn from_parts(secrets: Secrets, settings: Settings) -> Result<Self, ConfigError> {
        if settings.sync.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "sync.poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        if settings.sync.request_timeout_ms == 0
            || settings.sync.request_timeout_ms > settings.sync.poll_interval_ms
        {
            return Err(ConfigError::Invalid {
                key: "sync.request_timeout_ms",
                reason: format!(
                    "{} must be between 1 and sync.poll_interval_ms ({})",
                    settings.sync.request_timeout_ms, settings.sync.poll_interval_ms
                ),
            });
        }

        if settings.loader.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "loader.max_attempts",
                reason: "must be greater than zero".to_string(),
            });
        }

        if settings.loader.max_dimension == 0 {
            return Err(ConfigError::Invalid {
                key: "loader.max_dimension",
                reason: "must be greater than zero".to_string(),
            });
        }

        if !(1..=100).contains(&settings.loader.jpeg_quality) {
            return Err(ConfigError::Invalid {
                key: "loader.jpeg_quality",
                reason: format!("{} is outside 1..=100", settings.loader.jpeg_quality),
            });
        }

        if settings.loader.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "loader.attempt_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self { secrets, settings })
    }

    /// Get the job store API key (if configured).
    pub fn api_key(&self) -> Option<&str> {
        self.secrets.api_key.as_deref()
    }

    /// Get the push channel URL (if configured).
    pub fn push_url(&self) -> Option<&str> {
        self.settings.sync.push_url.as_deref()
    }
}

// Tests that modify environment variables must not run concurrently
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from_parts(Secrets::default(), Settings::default()).unwrap();
        assert!(config.api_key().is_none());
        assert!(config.push_url().is_none());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut settings = Settings::default();
        settings.sync.poll_interval_ms = 0;

        let err = Config::from_parts(Secrets::default(), settings).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "sync.poll_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_request_timeout_bounded_by_poll_interval() {
        let mut settings = Settings::default();
        settings.sync.poll_interval_ms = 1000;
        settings.sync.request_timeout_ms = 1500;

        let err = Config::from_parts(Secrets::default(), settings.clone()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "sync.request_timeout_ms",
                ..
            }
        ));

        settings.sync.request_timeout_ms = 0;
        assert!(Config::from_parts(Secrets::default(), settings.clone()).is_err());

        settings.sync.request_timeout_ms = 1000;
        assert!(Config::from_parts(Secrets::default(), settings).is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut settings = Settings::default();
        settings.loader.max_attempts = 0;

        let err = Config::from_parts(Secrets::default(), settings).unwrap_err();
        assert!(err.to_string().contains("loader.max_attempts"));
    }

    #[test]
    fn test_jpeg_quality_range() {
        let mut settings = Settings::default();
        settings.loader.jpeg_quality = 0;
        assert!(Config::from_parts(Secrets::default(), settings.clone()).is_err());

        settings.loader.jpeg_quality = 100;
        assert!(Config::from_parts(Secrets::default(), settings).is_ok());
    }

    #[test]
    fn test_api_key_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { env::set_var("LUMEN_API_KEY", "sk-test") }
        let secrets = Secrets::from_env_inner().unwrap();
        unsafe { env::remove_var("LUMEN_API_KEY") }

        let config = Config::from_parts(secrets, Settings::default()).unwrap();
        assert_eq!(config.api_key(), Some("sk-test"));
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { env::set_var("LUMEN_API_KEY", "  ") }
        let result = Secrets::from_env_inner();
        unsafe { env::remove_var("LUMEN_API_KEY") }

        assert!(matches!(result, Err(SecretsError::EmptySecret(_))));
    }

    #[test]
    fn test_missing_api_key_is_fine() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { env::remove_var("LUMEN_API_KEY") }
        let secrets = Secrets::from_env_inner().unwrap();
        assert!(!secrets.has_api_key());
    }
}
