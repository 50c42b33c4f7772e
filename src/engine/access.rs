//! Field access against JSON records.
//!
//! Records are flat-to-nested JSON objects. `access` resolves a parsed
//! `FieldPath`, fanning out over `[*]` wildcards; a missing field is an
//! empty match set, never an error.

use serde_json::Value;

use crate::spec::{FieldPath, Segment};

/// One catalog record.
pub type Record = serde_json::Map<String, Value>;

/// Resolve `path` against `record`. Returns every matched value; empty
/// means the field is absent. Non-wildcard paths yield at most one match.
pub fn access<'a>(record: &'a Record, path: &FieldPath) -> Vec<&'a Value> {
    let mut current: Vec<&'a Value> = Vec::new();
    match &path.0[0] {
        Segment::Key(k) => {
            if let Some(v) = record.get(k) {
                current.push(v);
            }
        }
        // parse() guarantees paths start with a key
        Segment::Wildcard => return Vec::new(),
    }

    for seg in &path.0[1..] {
        let mut next = Vec::new();
        for value in current {
            match seg {
                Segment::Key(k) => {
                    if let Some(obj) = value.as_object() {
                        if let Some(v) = obj.get(k) {
                            next.push(v);
                        }
                    }
                }
                Segment::Wildcard => {
                    if let Some(arr) = value.as_array() {
                        next.extend(arr.iter());
                    }
                }
            }
        }
        current = next;
    }

    current
}

/// Convenience for flat lookups on the hot (vectorized) path.
pub fn access_flat<'a>(record: &'a Record, key: &str) -> Option<&'a Value> {
    record.get(key)
}

/// Write `value` at a non-wildcard `path`, creating nothing: intermediate
/// objects must already exist. Returns false when the path cannot be
/// resolved, which callers treat as a skip.
pub fn set_at(record: &mut Record, path: &FieldPath, value: Value) -> bool {
    let keys: Vec<&str> = path
        .0
        .iter()
        .map(|seg| match seg {
            Segment::Key(k) => k.as_str(),
            Segment::Wildcard => "",
        })
        .collect();
    if keys.iter().any(|k| k.is_empty()) {
        return false;
    }

    if keys.len() == 1 {
        record.insert(keys[0].to_string(), value);
        return true;
    }

    let mut cursor = match record.get_mut(keys[0]) {
        Some(v) => v,
        None => return false,
    };
    for key in &keys[1..keys.len() - 1] {
        cursor = match cursor.as_object_mut().and_then(|o| o.get_mut(*key)) {
            Some(v) => v,
            None => return false,
        };
    }
    match cursor.as_object_mut() {
        Some(obj) => {
            obj.insert(keys[keys.len() - 1].to_string(), value);
            true
        }
        None => false,
    }
}
