//! Load-modify-store units driven by user actions
//!
//! Every action reloads the configuration file from disk, changes it in
//! memory, writes it back only if something changed and then asks CamillaDSP
//! to reload. The active device's snapshot is kept in step with the file.

mod actor;

pub use actor::{ControlActor, ControlCommand, ControlHandle, DEFAULT_DEBOUNCE_MS};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::document::{load_document, save_document, ConfigDocument};
use crate::error::DocumentError;
use crate::gain::{read_gains, write_gains, Gains};
use crate::normalizer::{ensure_device_section, normalize, reset_required_gains};
use crate::reload::{validate_port, ReloadError, Reloader};
use crate::settings::{Settings, SettingsStore, SharedSettings};

/// Result of writing gains
#[derive(Debug)]
pub struct SyncOutcome {
    /// Gains now stored in the file
    pub gains: Gains,
    /// Whether the file was rewritten
    pub written: bool,
    /// Reply of the reload requested after the write
    pub reload: Result<String, ReloadError>,
}

/// Result of switching the output device
#[derive(Debug)]
pub struct SwitchOutcome {
    /// The device now selected
    pub device: String,
    /// Whether a stored snapshot was applied
    pub restored: bool,
    /// Band gains of the config written for the device
    pub gains: Gains,
    /// Reply of the reload requested after the switch
    pub reload: Result<String, ReloadError>,
}

/// Result of changing the config file or control port
#[derive(Debug)]
pub struct SettingsOutcome {
    /// Whether the `devices` section of the config file was rewritten
    pub devices_written: bool,
    /// Reply of the reload requested afterwards
    pub reload: Result<String, ReloadError>,
}

/// Shared settings, their store and the reload path
pub struct EqSession {
    /// Also read by the presence watcher
    settings: SharedSettings,
    /// Where `settings` is saved after every change
    store: SettingsStore,
    reloader: Arc<dyn Reloader>,
}

impl EqSession {
    pub fn new(settings: SharedSettings, store: SettingsStore, reloader: Arc<dyn Reloader>) -> Self {
        Self {
            settings,
            store,
            reloader,
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    fn config_path(&self) -> Result<PathBuf, DocumentError> {
        self.settings
            .read()
            .config_path()
            .map(PathBuf::from)
            .ok_or(DocumentError::NoConfigPath)
    }

    async fn persist(&self) -> Result<()> {
        let settings: Settings = self.settings.read().clone();
        self.store
            .save_async(&settings)
            .await
            .context("Failed to save settings")
    }

    async fn reload(&self) -> Result<String, ReloadError> {
        let port = self.settings.read().port;
        let result = self.reloader.reload(port).await;
        if let Err(e) = &result {
            warn!("CamillaDSP reload failed: {}", e);
        }
        result
    }

    /// Read the current document, normalized in memory for the active device
    pub async fn load_document(&self) -> Result<ConfigDocument> {
        let path = self.config_path()?;
        let mut doc = load_document(&path).await?;
        let settings = self.settings.read();
        normalize(&mut doc, settings.selected_device(), &settings.engine);
        Ok(doc)
    }

    /// Gains to show on the knobs; the file is not modified
    pub async fn load_gains(&self) -> Result<Gains> {
        Ok(read_gains(&self.load_document().await?))
    }

    /// Normalize the file on disk. Returns whether it was rewritten.
    pub async fn normalize_file(&self) -> Result<bool> {
        let path = self.config_path()?;
        let mut doc = load_document(&path).await?;
        let changed = {
            let settings = self.settings.read();
            normalize(&mut doc, settings.selected_device(), &settings.engine)
        };
        if changed {
            save_document(&path, &doc).await?;
            info!("Normalized {}", path.display());
        }
        Ok(changed)
    }

    /// Write the three band gains, snapshot the active device and reload
    pub async fn apply_gains(&self, gains: &Gains) -> Result<SyncOutcome> {
        let path = self.config_path()?;
        let mut doc = load_document(&path).await?;

        let (written, device) = {
            let settings = self.settings.read();
            let mut changed = normalize(&mut doc, settings.selected_device(), &settings.engine);
            changed |= write_gains(&mut doc, gains);
            (changed, settings.selected_device().map(str::to_string))
        };

        if written {
            save_document(&path, &doc).await?;
            debug!(
                "Gains written: bass {} / middle {} / treble {}",
                gains.bass, gains.middle, gains.treble
            );
        }

        if let Some(device) = device {
            let stale = {
                let mut settings = self.settings.write();
                let stale = settings.devices.restore(&device).as_ref() != Some(&doc);
                if stale {
                    settings.devices.snapshot(&device, &doc);
                }
                stale
            };
            if stale {
                self.persist().await?;
            }
        }

        Ok(SyncOutcome {
            gains: read_gains(&doc),
            written,
            reload: self.reload().await,
        })
    }

    /// Make `device` the output and write its config.
    ///
    /// A stored snapshot replaces the live document wholesale. A device seen
    /// for the first time starts from the live document with the band gains
    /// back at their shipped values.
    pub async fn select_device(&self, device: &str) -> Result<SwitchOutcome> {
        if device.trim().is_empty() {
            bail!("Device name must not be empty");
        }
        let path = self.config_path()?;
        let live = load_document(&path).await?;

        let (mut doc, restored, engine) = {
            let settings = self.settings.read();
            let engine = settings.engine.clone();
            match settings.devices.restore(device) {
                Some(snapshot) => (snapshot, true, engine),
                None => (live, false, engine),
            }
        };
        if !restored {
            reset_required_gains(&mut doc);
        }
        normalize(&mut doc, Some(device), &engine);
        save_document(&path, &doc).await?;

        {
            let mut settings = self.settings.write();
            settings.playback_device = device.to_string();
            settings.devices.snapshot(device, &doc);
        }
        self.persist().await?;

        info!(
            "Output device set to '{}' ({})",
            device,
            if restored { "snapshot restored" } else { "new profile" }
        );

        Ok(SwitchOutcome {
            device: device.to_string(),
            restored,
            gains: read_gains(&doc),
            reload: self.reload().await,
        })
    }

    /// Ask CamillaDSP to reload without touching the file
    pub async fn request_reload(&self) -> Result<String, ReloadError> {
        self.reload().await
    }

    /// Point at another CamillaDSP config file.
    ///
    /// The settings are saved first; the new file then gets a `devices`
    /// section for the active output and CamillaDSP is reloaded.
    pub async fn set_config_path(&self, path: impl Into<PathBuf>) -> Result<SettingsOutcome> {
        let path = path.into();
        info!("CamillaDSP config set to {}", path.display());
        self.settings.write().config_path = path;
        self.commit_settings().await
    }

    /// Change the control port, then sync the config and reload as
    /// [`EqSession::set_config_path`] does
    pub async fn set_port(&self, port: u32) -> Result<SettingsOutcome> {
        validate_port(port)?;
        info!("CamillaDSP control port set to {}", port);
        self.settings.write().port = port;
        self.commit_settings().await
    }

    async fn commit_settings(&self) -> Result<SettingsOutcome> {
        self.persist().await?;

        let devices_written = match self.config_path() {
            Ok(path) => {
                let mut doc = load_document(&path).await?;
                let changed = {
                    let settings = self.settings.read();
                    ensure_device_section(&mut doc, settings.selected_device(), &settings.engine)
                };
                if changed {
                    save_document(&path, &doc).await?;
                    debug!("Devices section updated in {}", path.display());
                }
                changed
            }
            Err(_) => {
                debug!("No config file set yet, skipping devices section");
                false
            }
        };

        Ok(SettingsOutcome {
            devices_written,
            reload: self.reload().await,
        })
    }
}
