//! CameliaEQ core
//!
//! Keeps a CamillaDSP YAML config in the shape the three-band equalizer
//! expects, reads and writes band gains, remembers a config per output
//! device and tells CamillaDSP to reload over its websocket.

pub mod document;
pub mod error;
pub mod gain;
pub mod normalizer;
pub mod paths;
pub mod presence;
pub mod profiles;
pub mod reload;
pub mod session;
pub mod settings;

pub use document::{ConfigDocument, Mapping, Value};
pub use error::{DocumentError, SettingsError};
pub use gain::Gains;
pub use normalizer::EngineDevices;
pub use paths::AppPaths;
pub use presence::{PresenceEvent, PresenceWatcher};
pub use profiles::DeviceProfileStore;
pub use reload::{ReloadClient, ReloadError, Reloader};
pub use session::{ControlActor, ControlHandle, EqSession};
pub use settings::{Settings, SettingsStore, SharedSettings};
