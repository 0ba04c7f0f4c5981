//! Reading and writing filter gains
//!
//! Gains live at `filters.<name>.parameters.gain`. Reads never fail: a missing
//! path is reported as `None` and callers fall back to [`default_gain`].

use serde::{Deserialize, Serialize};

use crate::document::{ConfigDocument, Value};
use crate::normalizer::{self, FILTERS};

/// Gain of a filter, or `None` if the filter, its parameters or a numeric
/// gain field is missing
pub fn read_gain(doc: &ConfigDocument, filter_name: &str) -> Option<f64> {
    doc.lookup(&[FILTERS, filter_name, "parameters", "gain"])
        .and_then(Value::as_f64)
}

/// Shipped gain of a band, 0 dB for any other filter
pub fn default_gain(filter_name: &str) -> f64 {
    normalizer::band_defaults(filter_name)
        .map(|d| d.gain as f64)
        .unwrap_or(0.0)
}

/// Set the gain of a filter, creating the filter if needed.
///
/// Unknown names get a neutral peaking template. Missing parameters of the
/// filter are filled from its template; present ones are kept. Returns `true`
/// if the document changed; storing a numerically equal gain is not a change.
pub fn write_gain(doc: &mut ConfigDocument, filter_name: &str, gain: f64) -> bool {
    let (filters, mut changed) = doc.mapping_entry(FILTERS);

    if !filters.get(filter_name).is_some_and(Value::is_mapping) {
        filters.insert(filter_name, normalizer::default_filter(filter_name));
        changed = true;
    }
    let Some(Value::Mapping(filter)) = filters.get_mut(filter_name) else {
        unreachable!("filter was just made a mapping");
    };

    let (params, replaced) = filter.mapping_entry("parameters");
    changed |= replaced;

    let template = normalizer::default_filter(filter_name);
    if let Some(Value::Mapping(defaults)) = template.get("parameters") {
        for (key, value) in defaults.iter() {
            if !params.contains_key(key) {
                params.insert(key, value.clone());
                changed = true;
            }
        }
    }

    if params.get("gain").and_then(Value::as_f64) != Some(gain) {
        params.insert("gain", gain);
        changed = true;
    }

    changed
}

/// Gains of the three bands as shown on the knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub bass: f64,
    pub middle: f64,
    pub treble: f64,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            bass: default_gain("Bass"),
            middle: default_gain("Middle"),
            treble: default_gain("Treble"),
        }
    }
}

impl Gains {
    /// `(filter name, gain)` pairs in display order
    pub fn bands(&self) -> [(&'static str, f64); 3] {
        [
            ("Bass", self.bass),
            ("Middle", self.middle),
            ("Treble", self.treble),
        ]
    }

    /// Update one band by filter name. Returns `false` for unknown names.
    pub fn set(&mut self, filter_name: &str, gain: f64) -> bool {
        match filter_name {
            "Bass" => self.bass = gain,
            "Middle" => self.middle = gain,
            "Treble" => self.treble = gain,
            _ => return false,
        }
        true
    }
}

/// Read all three band gains, falling back to the shipped defaults
pub fn read_gains(doc: &ConfigDocument) -> Gains {
    let mut gains = Gains::default();
    for (name, fallback) in Gains::default().bands() {
        gains.set(name, read_gain(doc, name).unwrap_or(fallback));
    }
    gains
}

/// Write all three band gains. Returns `true` if any of them changed.
pub fn write_gains(doc: &mut ConfigDocument, gains: &Gains) -> bool {
    let mut changed = false;
    for (name, gain) in gains.bands() {
        changed |= write_gain(doc, name, gain);
    }
    changed
}
