//! Canonical JSON and hashing, implemented once and shared by the trace
//! hash, state hash, config hash and the replay verifier.
//!
//! Rules: object keys sorted, no whitespace, UTF-8, floats quantized to
//! 1e-6, NaN and infinities replaced by the sentinels `"_nan"`,
//! `"_inf_pos"`, `"_inf_neg"`. Array order is semantic and preserved.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

const QUANTUM: f64 = 1e6;

pub const NAN_SENTINEL: &str = "_nan";
pub const INF_POS_SENTINEL: &str = "_inf_pos";
pub const INF_NEG_SENTINEL: &str = "_inf_neg";

/// Quantize a finite float to 6 decimals, normalizing `-0.0`.
pub fn quantize(x: f64) -> f64 {
    let q = (x * QUANTUM).round() / QUANTUM;
    if q == 0.0 {
        0.0
    } else {
        q
    }
}

/// Build a JSON number from a float, mapping non-finite values to their
/// canonical sentinels. `serde_json` cannot represent NaN/∞, so every
/// float entering a trace or packet goes through here.
pub fn num(x: f64) -> Value {
    if x.is_nan() {
        return Value::String(NAN_SENTINEL.to_string());
    }
    if x.is_infinite() {
        return Value::String(
            if x > 0.0 { INF_POS_SENTINEL } else { INF_NEG_SENTINEL }.to_string(),
        );
    }
    serde_json::Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                let f = n.as_f64().unwrap_or(0.0);
                let v = num(quantize(f));
                match v {
                    Value::Number(q) => out.push_str(&q.to_string()),
                    other => write_canonical(&other, out),
                }
            }
        }
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key).expect("string serialization is infallible"),
                );
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Canonical byte representation of a JSON value.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    let mut out = String::with_capacity(256);
    write_canonical(value, &mut out);
    out.into_bytes()
}

/// Hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonical hash of a JSON value.
pub fn hash_value(value: &Value) -> String {
    sha256_hex(&canonical_json_bytes(value))
}

/// Canonical hash of any serializable value.
pub fn hash_serializable<T: Serialize>(value: &T) -> String {
    let v = serde_json::to_value(value).unwrap_or(Value::Null);
    hash_value(&v)
}
