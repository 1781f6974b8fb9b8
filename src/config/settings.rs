// Stream settings and their on-disk store

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigResult};

/// User-facing stream configuration, persisted across restarts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Network paths sessions are permitted to negotiate on; empty means
    /// unrestricted
    pub allowed_paths: BTreeSet<String>,
    /// Whether the multiple-path advisory has already been shown
    pub path_advisory_shown: bool,
}

/// Persistence seam for stream settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> ConfigResult<StreamSettings>;
    async fn save(&self, settings: &StreamSettings) -> ConfigResult<()>;
}

/// TOML-file settings store
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config location, e.g.
    /// `~/.config/groundlink/settings.toml`
    pub fn default_location() -> ConfigResult<Self> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::new(dir.join("groundlink").join("settings.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for TomlSettingsStore {
    async fn load(&self) -> ConfigResult<StreamSettings> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            // A first run has no file yet; that is not an error.
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Ok(StreamSettings::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn save(&self, settings: &StreamSettings) -> ConfigResult<()> {
        let raw = toml::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename keeps a crash from truncating the live file.
        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlSettingsStore::new(dir.path().join("settings.toml"));
        assert_eq!(store.load().await.unwrap(), StreamSettings::default());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlSettingsStore::new(dir.path().join("settings.toml"));

        let mut settings = StreamSettings::default();
        settings.allowed_paths.insert("192.168.2.1".to_string());
        settings.path_advisory_shown = true;

        store.save(&settings).await.unwrap();
        assert_eq!(store.load().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlSettingsStore::new(dir.path().join("nested").join("settings.toml"));
        store.save(&StreamSettings::default()).await.unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_toml_serialize_deserialize() {
        let mut settings = StreamSettings::default();
        settings.allowed_paths.insert("10.0.0.1".to_string());

        let raw = toml::to_string_pretty(&settings).unwrap();
        let parsed: StreamSettings = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, settings);
    }
}
