//! Redact secrets from maps and logs; never write keys, tokens or raw
//! payloads anywhere.
//!
//! Matching is case-insensitive and ignores `-`, `_` and spaces, so
//! `API-Key`, `api_key` and `apikey` all hit the same rule. Nested maps
//! and lists are recursed; the normalized key set is computed once per
//! call, not per key.

use std::collections::HashSet;

use serde_json::{Map, Value};

/// Replacement for any sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Sensitive key set (pre-normalization).
pub const REDACT_KEYS: [&str; 12] = [
    "api_key",
    "apikey",
    "secret",
    "password",
    "token",
    "authorization",
    "auth",
    "private_key",
    "signature",
    "raw_payload",
    "headers",
    "api-key",
];

fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

fn normalized_key_set(keys: &[&str]) -> HashSet<String> {
    keys.iter().map(|k| normalize(k)).collect()
}

fn redact_impl(value: &Value, norm_set: &HashSet<String>) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                if norm_set.contains(&normalize(k)) {
                    out.insert(k.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k.clone(), redact_impl(v, norm_set));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_impl(v, norm_set)).collect())
        }
        other => other.clone(),
    }
}

/// Copy of `value` with every sensitive key's value replaced by
/// [`REDACTED`], at any depth, including inside lists.
pub fn redact_value(value: &Value) -> Value {
    redact_with_keys(value, &REDACT_KEYS)
}

/// Same, with a caller-supplied key subset.
pub fn redact_with_keys(value: &Value, keys: &[&str]) -> Value {
    let norm_set = normalized_key_set(keys);
    redact_impl(value, &norm_set)
}

/// Map-level convenience used by packet and audit paths.
pub fn redact_map(map: &Map<String, Value>) -> Map<String, Value> {
    match redact_value(&Value::Object(map.clone())) {
        Value::Object(out) => out,
        _ => unreachable!("redacting an object yields an object"),
    }
}
