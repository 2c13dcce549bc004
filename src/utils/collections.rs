//! Helpers for working with the `extra` channel's key-value map.
//!
//! The extra channel is a plain `FxHashMap<String, Value>`; these helpers
//! exist purely to cut down on `serde_json::json!(...)` boilerplate at call
//! sites that insert or read a handful of scalar fields.

use rustc_hash::FxHashMap;
use serde_json::{Number, Value};

/// The concrete map type backing the extra channel.
pub type ExtraMap = FxHashMap<String, Value>;

/// Construct an empty extra map.
pub fn new_extra_map() -> ExtraMap {
    FxHashMap::default()
}

/// Build an extra map from an iterator of `(key, value)` pairs.
pub fn extra_map_from_pairs<I, K>(pairs: I) -> ExtraMap
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Merge a sequence of extra maps left-to-right; later maps win on key conflicts.
pub fn merge_extra_maps<'a, I>(maps: I) -> ExtraMap
where
    I: IntoIterator<Item = &'a ExtraMap>,
{
    let mut merged = ExtraMap::default();
    for map in maps {
        for (k, v) in map {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// Ergonomic scalar accessors/inserters for extra maps.
pub trait ExtraMapExt {
    fn insert_string(&mut self, key: impl Into<String>, value: &str);
    fn insert_number(&mut self, key: impl Into<String>, value: impl Into<Number>);
    fn insert_bool(&mut self, key: impl Into<String>, value: bool);
    fn get_string(&self, key: &str) -> Option<&str>;
    fn get_number(&self, key: &str) -> Option<Number>;
    fn get_bool(&self, key: &str) -> Option<bool>;
}

impl ExtraMapExt for ExtraMap {
    fn insert_string(&mut self, key: impl Into<String>, value: &str) {
        self.insert(key.into(), Value::String(value.to_string()));
    }

    fn insert_number(&mut self, key: impl Into<String>, value: impl Into<Number>) {
        self.insert(key.into(), Value::Number(value.into()));
    }

    fn insert_bool(&mut self, key: impl Into<String>, value: bool) {
        self.insert(key.into(), Value::Bool(value));
    }

    fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn get_number(&self, key: &str) -> Option<Number> {
        self.get(key).and_then(Value::as_number).cloned()
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }
}
