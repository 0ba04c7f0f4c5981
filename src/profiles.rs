//! Per-output-device configuration snapshots
//!
//! Each output device the user has tuned keeps a full copy of the config as
//! it was last written while that device was active. Switching back to a
//! device restores its tuning verbatim. Entries are never removed
//! automatically, so an unplugged device gets its tuning back on reconnect.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::ConfigDocument;

/// Device display name → config snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceProfileStore {
    profiles: BTreeMap<String, ConfigDocument>,
}

impl DeviceProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a copy of `doc` for `device`, replacing any earlier snapshot
    pub fn snapshot(&mut self, device: &str, doc: &ConfigDocument) {
        debug!("Storing config snapshot for device '{}'", device);
        self.profiles.insert(device.to_string(), doc.clone());
    }

    /// Copy of the snapshot stored for `device`
    pub fn restore(&self, device: &str) -> Option<ConfigDocument> {
        self.profiles.get(device).cloned()
    }

    pub fn contains(&self, device: &str) -> bool {
        self.profiles.contains_key(device)
    }

    /// Names of all devices with a snapshot, sorted
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
