//! Reading and writing the configuration file

use std::path::Path;

use tokio::fs;
use tracing::debug;

use super::{ConfigDocument, Value};
use crate::error::DocumentError;

/// Load a configuration document from disk.
///
/// An empty file (or one holding only comments) loads as an empty mapping.
pub async fn load_document(path: impl AsRef<Path>) -> Result<ConfigDocument, DocumentError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .await
        .map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let doc = parse_document(&contents).map_err(|e| e.with_path(path))?;
    debug!("Loaded config document {} ({} top-level keys)", path.display(), doc.len());
    Ok(doc)
}

/// Write a configuration document to disk, in place.
///
/// The document is serialized before the file is opened, so a serialization
/// failure leaves the previous content untouched.
pub async fn save_document(
    path: impl AsRef<Path>,
    doc: &ConfigDocument,
) -> Result<(), DocumentError> {
    let path = path.as_ref();
    let yaml = to_yaml_string(doc)?;

    fs::write(path, yaml)
        .await
        .map_err(|source| DocumentError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    debug!("Saved config document {}", path.display());
    Ok(())
}

/// Serialize a document the way it is written to disk
pub fn to_yaml_string(doc: &ConfigDocument) -> Result<String, DocumentError> {
    serde_yaml::to_string(doc).map_err(DocumentError::Serialize)
}

fn parse_document(contents: &str) -> Result<ConfigDocument, DocumentError> {
    if contents.trim().is_empty() {
        return Ok(ConfigDocument::new());
    }

    let raw: serde_yaml::Value =
        serde_yaml::from_str(contents).map_err(|source| DocumentError::Parse {
            path: None,
            source,
        })?;

    match Value::from(raw) {
        Value::Mapping(m) => Ok(m),
        Value::Null => Ok(ConfigDocument::new()),
        other => Err(DocumentError::NotAMapping {
            path: None,
            found: other.kind(),
        }),
    }
}
