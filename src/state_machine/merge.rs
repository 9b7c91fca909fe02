//! Deep merge of crew results into the project record.
//!
//! Objects merge key by key, recursively. Every other value, arrays
//! included, replaces what was there. `null` is stored as `null`.

use crate::constants::record_keys;
use serde_json::{Map, Value};

pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(existing), Value::Object(incoming)) => merge_maps(existing, incoming),
        (slot, value) => *slot = value.clone(),
    }
}

pub fn merge_maps(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match target.get_mut(key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merge crew data into record fields, leaving reserved keys untouched.
///
/// Returns the reserved keys that were ignored.
pub fn merge_crew_data(fields: &mut Map<String, Value>, data: &Map<String, Value>) -> Vec<String> {
    let mut ignored = Vec::new();
    let mut patch = Map::with_capacity(data.len());
    for (key, value) in data {
        if record_keys::RESERVED.contains(&key.as_str()) {
            ignored.push(key.clone());
        } else {
            patch.insert(key.clone(), value.clone());
        }
    }
    merge_maps(fields, &patch);
    ignored
}
