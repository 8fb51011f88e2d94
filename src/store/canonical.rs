//! Canonical JSON and content hashing
//!
//! Object keys are emitted in sorted order so that two maps with the same
//! entries always serialize identically; arrays keep their declared order.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Serialize a `Value` canonically: sorted keys, no insignificant whitespace
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), to_canonical_json(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// Hex-encoded SHA-256 of the canonical form
pub fn canonical_digest(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}
