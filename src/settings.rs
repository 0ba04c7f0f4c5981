//! Persistent application settings
//!
//! Holds the control port, the CamillaDSP config location, the selected
//! output device and the per-device config snapshots. Stored as YAML in the
//! application directory; a legacy `config.json` is migrated the first time
//! the YAML file is missing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SettingsError;
use crate::normalizer::EngineDevices;
use crate::paths::AppPaths;
use crate::profiles::DeviceProfileStore;

/// Settings shared between the control path and the presence watcher
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Root settings structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// CamillaDSP config file; empty when not chosen yet
    #[serde(default)]
    pub config_path: PathBuf,
    /// CamillaDSP websocket port
    #[serde(default = "default_port")]
    pub port: u32,
    /// Display name of the selected output device
    #[serde(default)]
    pub playback_device: String,
    /// Fixed values enforced in the `devices` section
    #[serde(default)]
    pub engine: EngineDevices,
    /// External command printing one output device name per line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_command: Option<Vec<String>>,
    /// Presence poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Config snapshot per output device
    #[serde(default)]
    pub devices: DeviceProfileStore,
}

fn default_port() -> u32 {
    1234
}

fn default_poll_interval_ms() -> u64 {
    3000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            port: default_port(),
            playback_device: String::new(),
            engine: EngineDevices::default(),
            device_command: None,
            poll_interval_ms: default_poll_interval_ms(),
            devices: DeviceProfileStore::new(),
        }
    }
}

impl Settings {
    /// The config file, if one was chosen
    pub fn config_path(&self) -> Option<&Path> {
        Some(self.config_path.as_path()).filter(|p| !p.as_os_str().is_empty())
    }

    /// The selected device, if any
    pub fn selected_device(&self) -> Option<&str> {
        Some(self.playback_device.as_str()).filter(|d| !d.is_empty())
    }

    pub fn into_shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }
}

/// Loads and saves [`Settings`] at fixed paths
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    legacy_path: PathBuf,
}

impl SettingsStore {
    pub fn new(paths: &AppPaths) -> Self {
        Self {
            path: paths.settings.clone(),
            legacy_path: paths.legacy_settings.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings.
    ///
    /// Reads the YAML file if present. Otherwise migrates the legacy JSON
    /// file (writing the YAML file right away), or returns defaults.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        if self.path.exists() {
            let text = std::fs::read_to_string(&self.path).map_err(|source| SettingsError::Read {
                path: self.path.clone(),
                source,
            })?;
            if text.trim().is_empty() {
                return Ok(Settings::default());
            }
            let settings = serde_yaml::from_str(&text).map_err(|source| SettingsError::Parse {
                path: self.path.clone(),
                source,
            })?;
            debug!("Settings loaded from {}", self.path.display());
            return Ok(settings);
        }

        if self.legacy_path.exists() {
            let settings = self.load_legacy()?;
            info!(
                "Migrating legacy settings {} to {}",
                self.legacy_path.display(),
                self.path.display()
            );
            self.save(&settings)?;
            return Ok(settings);
        }

        info!("No settings file found, using defaults");
        Ok(Settings::default())
    }

    /// Load settings, logging and falling back to defaults on failure
    pub fn load_or_default(&self) -> Settings {
        self.load().unwrap_or_else(|e| {
            warn!("{} (using default settings)", e);
            Settings::default()
        })
    }

    fn load_legacy(&self) -> Result<Settings, SettingsError> {
        let text = std::fs::read_to_string(&self.legacy_path).map_err(|source| SettingsError::Read {
            path: self.legacy_path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SettingsError::LegacyParse {
            path: self.legacy_path.clone(),
            source,
        })
    }

    fn render(settings: &Settings) -> Result<String, SettingsError> {
        serde_yaml::to_string(settings).map_err(SettingsError::Serialize)
    }

    fn ensure_parent(&self) -> Result<(), SettingsError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                    path: self.path.clone(),
                    source,
                })
            }
            _ => Ok(()),
        }
    }

    /// Save settings to disk
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let yaml = Self::render(settings)?;
        self.ensure_parent()?;
        std::fs::write(&self.path, yaml).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!("Settings saved to {}", self.path.display());
        Ok(())
    }

    /// Save settings without blocking the async runtime
    pub async fn save_async(&self, settings: &Settings) -> Result<(), SettingsError> {
        let yaml = Self::render(settings)?;
        self.ensure_parent()?;
        tokio::fs::write(&self.path, yaml)
            .await
            .map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })?;
        debug!("Settings saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ConfigDocument;
    use crate::gain::{read_gain, write_gain};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SettingsStore {
        SettingsStore::new(&AppPaths::in_dir(dir.path()))
    }

    #[test]
    fn test_missing_files_give_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = store_in(&dir).load().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.port, 1234);
        assert_eq!(settings.config_path(), None);
        assert_eq!(settings.selected_device(), None);
    }

    #[test]
    fn test_save_and_load_with_profiles() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut settings = Settings {
            config_path: PathBuf::from("/tmp/camilla.yml"),
            port: 4321,
            playback_device: "Speakers".to_string(),
            ..Settings::default()
        };
        let mut doc = ConfigDocument::new();
        write_gain(&mut doc, "Bass", 2.0);
        settings.devices.snapshot("Speakers", &doc);

        store.save(&settings).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, settings);
        assert_eq!(read_gain(&loaded.devices.restore("Speakers").unwrap(), "Bass"), Some(2.0));
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "playback_device: Headphones\n").unwrap();

        let settings = store.load().unwrap();
        assert_eq!(settings.playback_device, "Headphones");
        assert_eq!(settings.port, 1234);
        assert_eq!(settings.poll_interval_ms, 3000);
        assert!(settings.devices.is_empty());
    }

    #[test]
    fn test_legacy_json_is_migrated_once() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let legacy = dir.path().join("config.json");
        std::fs::write(
            &legacy,
            r#"{"config_path": "/Users/me/camilla.yml", "port": 5005, "playback_device": "MacBook Pro Speakers"}"#,
        )
        .unwrap();

        let settings = store.load().unwrap();
        assert_eq!(settings.port, 5005);
        assert_eq!(settings.config_path(), Some(Path::new("/Users/me/camilla.yml")));
        assert!(store.path().exists());

        // The YAML file now wins over the legacy one
        std::fs::write(&legacy, r#"{"port": 1}"#).unwrap();
        assert_eq!(store.load().unwrap().port, 5005);
    }

    #[test]
    fn test_corrupt_settings_report_an_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "port: [not a number\n").unwrap();

        assert!(matches!(store.load(), Err(SettingsError::Parse { .. })));
        assert_eq!(store.load_or_default(), Settings::default());
    }

    #[tokio::test]
    async fn test_save_async_creates_parent() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(&AppPaths::in_dir(dir.path().join("a/b")));

        store.save_async(&Settings::default()).await.unwrap();
        assert_eq!(store.load().unwrap(), Settings::default());
    }
}
