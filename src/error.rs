//! Error types shared by the document and settings layers

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures reading or writing the CamillaDSP configuration file
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("No CamillaDSP config file is set")]
    NoConfigPath,

    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config{}: {source}", display_path(.path))]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Config root must be a mapping, found {found}{}", display_path(.path))]
    NotAMapping {
        path: Option<PathBuf>,
        found: &'static str,
    },

    #[error("Failed to serialize config to YAML: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("Failed to write config file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DocumentError {
    /// Attach the file path to errors raised while parsing file contents
    pub(crate) fn with_path(self, file: &Path) -> Self {
        match self {
            DocumentError::Parse { path: None, source } => DocumentError::Parse {
                path: Some(file.to_path_buf()),
                source,
            },
            DocumentError::NotAMapping { path: None, found } => DocumentError::NotAMapping {
                path: Some(file.to_path_buf()),
                found,
            },
            other => other,
        }
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

/// Failures loading or saving the application settings file
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse legacy settings {}: {source}", .path.display())]
    LegacyParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("Failed to write settings {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
