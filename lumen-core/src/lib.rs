pub mod config;
pub mod locale;
pub mod record;
pub mod status;

// Config re-exports
pub use config::{
    Config,
    ConfigError,
    LoaderSettings,
    LoggingSettings,
    NotificationSettings,
    Secrets,
    SecretsError,
    Settings,
    SettingsError,
    SyncSettings,
};

pub use locale::{Locale, TextKey};
pub use record::{JobRecord, StatusEvent};
pub use status::{JobStatus, UnknownStatus};
