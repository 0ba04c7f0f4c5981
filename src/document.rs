//! In-memory model of the CamillaDSP configuration file
//!
//! The configuration is kept as a generic tree rather than a typed struct so
//! that anything the user wrote by hand survives a load/modify/save cycle.
//! Mappings are ordered `(key, value)` pairs: the device section is expected
//! first and `mixers`/`processors` last, so reordering is a first-class
//! operation here instead of something bolted onto a hash map.

mod io;

pub use io::{load_document, save_document, to_yaml_string};

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A whole configuration document. The root is always a mapping.
pub type ConfigDocument = Mapping;

/// A node of the configuration tree
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(Mapping),
}

/// Ordered mapping with lookup by key
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mapping {
    entries: Vec<(String, Value)>,
}

impl Value {
    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of integer and float scalars
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Value::Mapping(_))
    }

    /// Short name of the node kind, for log messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Mapping> for Value {
    fn from(m: Mapping) -> Self {
        Value::Mapping(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(s: Vec<Value>) -> Self {
        Value::Sequence(s)
    }
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert or replace a value.
    ///
    /// An existing key keeps its position; a new key is appended.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(idx) => Some(std::mem::replace(&mut self.entries[idx].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Remove a key, keeping the relative order of the others
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.position(key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Move `key` to the first position. Returns `true` if the order changed.
    pub fn move_to_front(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(0) | None => false,
            Some(idx) => {
                let entry = self.entries.remove(idx);
                self.entries.insert(0, entry);
                true
            }
        }
    }

    /// Move `key` to the last position. Returns `true` if the order changed.
    pub fn move_to_back(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(idx) if idx + 1 < self.entries.len() => {
                let entry = self.entries.remove(idx);
                self.entries.push(entry);
                true
            }
            _ => false,
        }
    }

    /// Get the mapping stored under `key`, replacing a missing or
    /// wrongly-shaped value with an empty mapping.
    ///
    /// The flag is `true` when a replacement happened.
    pub fn mapping_entry(&mut self, key: &str) -> (&mut Mapping, bool) {
        let replaced = !self.get(key).is_some_and(Value::is_mapping);
        if replaced {
            self.insert(key, Mapping::new());
        }
        let mapping = self
            .get_mut(key)
            .and_then(Value::as_mapping_mut)
            .expect("invariant: value was just made a mapping");
        (mapping, replaced)
    }

    /// Sequence counterpart of [`Mapping::mapping_entry`]
    pub fn sequence_entry(&mut self, key: &str) -> (&mut Vec<Value>, bool) {
        let replaced = !matches!(self.get(key), Some(Value::Sequence(_)));
        if replaced {
            self.insert(key, Vec::<Value>::new());
        }
        let sequence = self
            .get_mut(key)
            .and_then(Value::as_sequence_mut)
            .expect("invariant: value was just made a sequence");
        (sequence, replaced)
    }

    /// Follow a path of mapping keys
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.get(first)?;
        for key in rest {
            current = current.as_mapping()?.get(key)?;
        }
        Some(current)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut mapping = Mapping::new();
        for (k, v) in iter {
            mapping.insert(k, v);
        }
        mapping
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Mapping(m) => m.serialize(serializer),
        }
    }
}

impl Serialize for Mapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_yaml::Value::deserialize(deserializer).map(Value::from)
    }
}

impl<'de> Deserialize<'de> for Mapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Mapping(m) => Ok(m),
            Value::Null => Ok(Mapping::new()),
            other => Err(serde::de::Error::custom(format!(
                "expected a mapping, found {}",
                other.kind()
            ))),
        }
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(value: serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_yaml::Value::String(s) => Value::String(s),
            serde_yaml::Value::Sequence(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_yaml::Value::Mapping(m) => Value::Mapping(
                m.into_iter()
                    .map(|(k, v)| (key_to_string(k), Value::from(v)))
                    .collect(),
            ),
            // Tags carry no meaning for CamillaDSP configs; keep the payload.
            serde_yaml::Value::Tagged(tagged) => Value::from(tagged.value),
        }
    }
}

fn key_to_string(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Mapping {
        [("a", 1i64), ("b", 2), ("c", 3)].into_iter().collect()
    }

    #[test]
    fn test_insert_keeps_position_of_existing_key() {
        let mut m = abc();
        let old = m.insert("b", 20i64);
        assert_eq!(old, Some(Value::Int(2)));
        assert_eq!(m.keys().collect::<Vec<_>>(), ["a", "b", "c"]);
        assert_eq!(m.get("b"), Some(&Value::Int(20)));
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut m = abc();
        assert_eq!(m.remove("a"), Some(Value::Int(1)));
        assert_eq!(m.keys().collect::<Vec<_>>(), ["b", "c"]);
        assert_eq!(m.remove("missing"), None);
    }

    #[test]
    fn test_move_to_front_and_back() {
        let mut m = abc();
        assert!(m.move_to_front("c"));
        assert_eq!(m.keys().collect::<Vec<_>>(), ["c", "a", "b"]);
        assert!(!m.move_to_front("c"));

        assert!(m.move_to_back("c"));
        assert_eq!(m.keys().collect::<Vec<_>>(), ["a", "b", "c"]);
        assert!(!m.move_to_back("c"));
        assert!(!m.move_to_back("missing"));
    }

    #[test]
    fn test_mapping_entry_replaces_wrong_shape() {
        let mut m = Mapping::new();
        m.insert("filters", "oops");

        let (filters, replaced) = m.mapping_entry("filters");
        assert!(replaced);
        filters.insert("Bass", Mapping::new());

        let (filters, replaced) = m.mapping_entry("filters");
        assert!(!replaced);
        assert!(filters.contains_key("Bass"));
    }

    #[test]
    fn test_clone_is_deep() {
        let mut inner = Mapping::new();
        inner.insert("gain", 1i64);
        let mut original = Mapping::new();
        original.insert("Bass", inner);

        let mut copy = original.clone();
        copy.get_mut("Bass")
            .and_then(Value::as_mapping_mut)
            .unwrap()
            .insert("gain", 9i64);

        assert_eq!(original.lookup(&["Bass", "gain"]), Some(&Value::Int(1)));
        assert_eq!(copy.lookup(&["Bass", "gain"]), Some(&Value::Int(9)));
    }

    #[test]
    fn test_yaml_order_survives_parse_and_serialize() {
        let yaml = "zeta: 1\nalpha:\n  y: true\n  x: ~\nmid: [1, 2.5, text]\n";
        let doc: Mapping = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.keys().collect::<Vec<_>>(), ["zeta", "alpha", "mid"]);
        assert_eq!(
            doc.lookup(&["alpha"]).and_then(Value::as_mapping).unwrap().keys().collect::<Vec<_>>(),
            ["y", "x"]
        );

        let out = serde_yaml::to_string(&doc).unwrap();
        let again: Mapping = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc, again);
    }

    #[test]
    fn test_non_string_keys_are_stringified() {
        let doc: Mapping = serde_yaml::from_str("1: one\ntrue: yes\n").unwrap();
        assert_eq!(doc.keys().collect::<Vec<_>>(), ["1", "true"]);
    }

    #[test]
    fn test_numbers_keep_their_kind() {
        let doc: Mapping = serde_yaml::from_str("i: 3\nf: 0.9\n").unwrap();
        assert_eq!(doc.get("i"), Some(&Value::Int(3)));
        assert_eq!(doc.get("f"), Some(&Value::Float(0.9)));
        assert_eq!(doc.get("i").and_then(Value::as_f64), Some(3.0));
    }
}
