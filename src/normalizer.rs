//! Structural normalization of CamillaDSP configs
//!
//! Every `ensure_*` function brings one part of a (possibly hand-edited)
//! document into the shape the equalizer relies on and reports whether it
//! touched anything. They never fail: a section of the wrong shape is treated
//! as missing and replaced. Values the user already set correctly are left
//! alone, in particular an existing filter `gain`.
//!
//! All functions are idempotent: a second call right after the first
//! returns `false` and leaves the document unchanged.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{ConfigDocument, Mapping, Value};
use crate::gain;

pub const DEVICES: &str = "devices";
pub const FILTERS: &str = "filters";
pub const PIPELINE: &str = "pipeline";
pub const MIXERS: &str = "mixers";
pub const PROCESSORS: &str = "processors";

/// The three equalizer bands, in display order
pub const REQUIRED_FILTERS: [&str; 3] = ["Bass", "Middle", "Treble"];

/// Filter kind used for every band
pub const DEFAULT_FILTER_TYPE: &str = "Biquad";

/// Shipped parameter set of a band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandDefaults {
    pub freq: i64,
    pub gain: i64,
    pub q: f64,
    pub curve: &'static str,
}

const BASS: BandDefaults = BandDefaults {
    freq: 85,
    gain: 3,
    q: 0.9,
    curve: "Lowshelf",
};

const MIDDLE: BandDefaults = BandDefaults {
    freq: 1000,
    gain: 0,
    q: 0.5,
    curve: "Peaking",
};

const TREBLE: BandDefaults = BandDefaults {
    freq: 6500,
    gain: 2,
    q: 0.7,
    curve: "Highshelf",
};

/// Starting point for filters that are not one of the three bands
const FALLBACK: BandDefaults = BandDefaults {
    freq: 1000,
    gain: 0,
    q: 0.5,
    curve: "Peaking",
};

/// Shipped defaults of a required band, `None` for any other name
pub fn band_defaults(name: &str) -> Option<BandDefaults> {
    match name {
        "Bass" => Some(BASS),
        "Middle" => Some(MIDDLE),
        "Treble" => Some(TREBLE),
        _ => None,
    }
}

impl BandDefaults {
    fn parameters(&self) -> Mapping {
        let mut params = Mapping::new();
        params.insert("type", self.curve);
        params.insert("freq", self.freq);
        params.insert("gain", self.gain);
        params.insert("q", self.q);
        params
    }

    fn filter(&self) -> Mapping {
        let mut filter = Mapping::new();
        filter.insert("type", DEFAULT_FILTER_TYPE);
        filter.insert("description", Value::Null);
        filter.insert("parameters", self.parameters());
        filter
    }
}

/// Full filter definition for `name`: the band template for the three known
/// bands, a neutral peaking filter otherwise. Always a fresh copy.
pub fn default_filter(name: &str) -> Mapping {
    band_defaults(name).unwrap_or(FALLBACK).filter()
}

/// Fixed values of the `devices` section
///
/// Everything except the playback device name is the same for every output
/// device. The defaults target the macOS loopback setup; they can be
/// overridden from the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineDevices {
    pub samplerate: u32,
    pub chunksize: u32,
    pub target_level: u32,
    pub channels: u32,
    pub capture_device: String,
    pub capture_type: String,
    pub playback_type: String,
}

impl Default for EngineDevices {
    fn default() -> Self {
        Self {
            samplerate: 44100,
            chunksize: 1024,
            target_level: 1024,
            channels: 2,
            capture_device: "BlackHole 2ch".to_string(),
            capture_type: "CoreAudio".to_string(),
            playback_type: "CoreAudio".to_string(),
        }
    }
}

/// Make sure the three bands exist and are referenced by the pipeline.
///
/// Missing filters get a full default definition. Present filters only get
/// their missing fields filled in. A required name not referenced by any
/// `Filter` step gets a new step appended at the end of the pipeline.
pub fn ensure_filters_and_pipeline(doc: &mut ConfigDocument) -> bool {
    let (filters, mut changed) = doc.mapping_entry(FILTERS);

    for name in REQUIRED_FILTERS {
        match filters.get_mut(name) {
            Some(Value::Mapping(filter)) => {
                changed |= fill_missing_filter_fields(filter, &default_filter(name));
            }
            existing => {
                if let Some(other) = existing {
                    debug!("Filter {} is a {}, replacing with default", name, other.kind());
                }
                filters.insert(name, default_filter(name));
                changed = true;
            }
        }
    }

    let (pipeline, replaced) = doc.sequence_entry(PIPELINE);
    changed |= replaced;

    let referenced = referenced_filter_names(pipeline);
    for name in REQUIRED_FILTERS {
        if !referenced.iter().any(|n| n == name) {
            debug!("Appending pipeline step for filter {}", name);
            pipeline.push(pipeline_step(name));
            changed = true;
        }
    }

    changed
}

/// Fill fields of `filter` that are missing in it from `template`.
///
/// Returns `true` if anything was added.
fn fill_missing_filter_fields(filter: &mut Mapping, template: &Mapping) -> bool {
    let mut changed = false;

    for key in ["type", "description"] {
        if !filter.contains_key(key) {
            let value = template.get(key).cloned().unwrap_or_default();
            filter.insert(key, value);
            changed = true;
        }
    }

    let (params, replaced) = filter.mapping_entry("parameters");
    changed |= replaced;
    if let Some(Value::Mapping(defaults)) = template.get("parameters") {
        for (key, value) in defaults.iter() {
            if !params.contains_key(key) {
                params.insert(key, value.clone());
                changed = true;
            }
        }
    }

    changed
}

fn referenced_filter_names(pipeline: &[Value]) -> Vec<String> {
    pipeline
        .iter()
        .filter_map(Value::as_mapping)
        .filter(|step| step.get("type").and_then(Value::as_str) == Some("Filter"))
        .filter_map(|step| step.get("names").and_then(Value::as_sequence))
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

/// Pipeline step applying one filter to both channels
pub fn pipeline_step(name: &str) -> Value {
    let mut step = Mapping::new();
    step.insert("type", "Filter");
    step.insert("description", Value::Null);
    step.insert("channels", vec![Value::Int(0), Value::Int(1)]);
    step.insert("names", vec![Value::from(name)]);
    step.insert("bypassed", Value::Null);
    Value::Mapping(step)
}

/// Make sure the `devices` section matches `defaults`.
///
/// `playback.device` is only written when a non-empty `selected_device` is
/// given. A section that had to be created is moved to the top of the
/// document; an existing one keeps its position.
pub fn ensure_device_section(
    doc: &mut ConfigDocument,
    selected_device: Option<&str>,
    defaults: &EngineDevices,
) -> bool {
    let (devices, created) = doc.mapping_entry(DEVICES);
    let mut changed = created;

    changed |= ensure_value(devices, "samplerate", defaults.samplerate);
    changed |= ensure_value(devices, "chunksize", defaults.chunksize);
    changed |= ensure_value(devices, "target_level", defaults.target_level);

    let (capture, replaced) = devices.mapping_entry("capture");
    changed |= replaced;
    changed |= ensure_value(capture, "channels", defaults.channels);
    changed |= ensure_value(capture, "device", defaults.capture_device.as_str());
    changed |= ensure_value(capture, "type", defaults.capture_type.as_str());

    let (playback, replaced) = devices.mapping_entry("playback");
    changed |= replaced;
    changed |= ensure_value(playback, "channels", defaults.channels);
    if let Some(device) = selected_device.filter(|d| !d.is_empty()) {
        changed |= ensure_value(playback, "device", device);
    }
    changed |= ensure_value(playback, "type", defaults.playback_type.as_str());

    if created {
        doc.move_to_front(DEVICES);
    }

    changed
}

/// Set `map[key]` to `expected` unless it already holds that value.
///
/// Numbers compare by value, so `1024.0` satisfies `1024`.
fn ensure_value(map: &mut Mapping, key: &str, expected: impl Into<Value>) -> bool {
    let expected = expected.into();
    let matches = match (map.get(key), &expected) {
        (Some(current), wanted) => match (current.as_f64(), wanted.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => current == wanted,
        },
        (None, _) => false,
    };
    if !matches {
        map.insert(key, expected);
    }
    !matches
}

/// Make sure `mixers` and `processors` exist and are the last two keys,
/// in that order. Reorders on every call if needed.
pub fn ensure_mixers_and_processors(doc: &mut ConfigDocument) -> bool {
    let mut changed = false;
    for key in [MIXERS, PROCESSORS] {
        let (_, replaced) = doc.mapping_entry(key);
        changed |= replaced;
    }

    let keys: Vec<&str> = doc.keys().collect();
    if !keys.ends_with(&[MIXERS, PROCESSORS]) {
        doc.move_to_back(MIXERS);
        doc.move_to_back(PROCESSORS);
        changed = true;
    }

    changed
}

/// Run every normalization step. Returns `true` if any of them changed the document.
pub fn normalize(
    doc: &mut ConfigDocument,
    selected_device: Option<&str>,
    defaults: &EngineDevices,
) -> bool {
    let mut changed = ensure_device_section(doc, selected_device, defaults);
    changed |= ensure_filters_and_pipeline(doc);
    changed |= ensure_mixers_and_processors(doc);
    changed
}

/// Put the three band gains back to their shipped values
pub fn reset_required_gains(doc: &mut ConfigDocument) -> bool {
    let mut changed = false;
    for name in REQUIRED_FILTERS {
        changed |= gain::write_gain(doc, name, gain::default_gain(name));
    }
    changed
}
