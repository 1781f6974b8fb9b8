// Persisted application settings
//
// The path allow-list and the one-time advisory flag survive restarts; the
// multiplexer is their only in-process consumer, but user settings may be
// rewritten externally at any time.

pub mod settings;

pub use settings::{SettingsStore, StreamSettings, TomlSettingsStore};

use thiserror::Error;

/// Result type for settings persistence
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings persistence errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Settings serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}
