//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Portable mode**: If a `.portable` marker file exists next to the
//!   executable, settings and logs are stored in the same directory.
//! - **Installed mode** (default): Data is stored in the per-user config
//!   directory (`~/Library/Application Support/CameliaEQ` on macOS,
//!   `~/.config/CameliaEQ` on Linux).

use std::path::{Path, PathBuf};

use tracing::debug;

/// Application name used for directories in installed mode
pub const APP_NAME: &str = "CameliaEQ";

/// Current settings file name
const SETTINGS_FILE: &str = "settings.yml";

/// Settings file written by releases before the YAML format
const LEGACY_SETTINGS_FILE: &str = "config.json";

/// Application paths for settings and logs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the settings file
    pub settings: PathBuf,
    /// Path to the legacy JSON settings file, migrated once
    pub legacy_settings: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (settings next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Note: This is called before logging is initialized, so we use eprintln
    /// for early diagnostic output.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            let mut paths = Self::in_dir(&exe_dir);
            paths.is_portable = true;
            return paths;
        }

        let base = dirs::config_dir().unwrap_or_else(|| {
            eprintln!("[paths] WARNING: dirs::config_dir() returned None, falling back to exe dir");
            exe_dir.clone()
        });

        Self::in_dir(base.join(APP_NAME))
    }

    /// Paths rooted at an explicit directory
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            settings: dir.join(SETTINGS_FILE),
            legacy_settings: dir.join(LEGACY_SETTINGS_FILE),
            logs_dir: dir.join("logs"),
            is_portable: false,
        }
    }

    /// Paths for an explicit settings file; the legacy file is looked up
    /// next to it.
    pub fn for_settings_file(settings: impl Into<PathBuf>) -> Self {
        let settings = settings.into();
        let dir = settings
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            settings,
            ..Self::in_dir(dir)
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.settings
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure the settings and logs directories exist.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        let base = self.base_dir();
        if !base.exists() {
            debug!("Creating settings directory: {}", base.display());
            std::fs::create_dir_all(&base)?;
        }

        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir)?;
        }

        Ok(())
    }
}
