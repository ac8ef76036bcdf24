//! Secrets configuration loaded from environment variables only.
//!
//! The job store key is the only secret the core needs; it should never be
//! written to the TOML settings file.

use std::env;

/// Secrets loaded exclusively from environment variables.
#[derive(Clone, Default)]
pub struct Secrets {
    /// Job store API key (env: LUMEN_API_KEY)
    pub api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Errors that can occur when loading secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Secret {0} is set but empty")]
    EmptySecret(String),
}

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// Also loads a `.env` file if present (development convenience).
    pub fn from_env() -> Result<Self, SecretsError> {
        let _ = dotenvy::dotenv();

        Self::from_env_inner()
    }

    /// Internal method to load from environment without loading .env
    pub(crate) fn from_env_inner() -> Result<Self, SecretsError> {
        let api_key = match env::var("LUMEN_API_KEY") {
            Ok(value) if value.trim().is_empty() => {
                return Err(SecretsError::EmptySecret("LUMEN_API_KEY".to_string()));
            }
            Ok(value) => Some(value),
            Err(_) => None,
        };

        Ok(Self { api_key })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}
