use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::bundle::Bundle;
use crate::error::{map_json, StoryForgeError};

pub const SHA256_HEX_LEN: usize = 64;
pub const ROLLING_HEX_LEN: usize = 8;

/// Builds the hashed payload `{metadata, data, assets}` from an untyped bundle.
///
/// `version`, `compiledAt` and `checksum` are not part of the digest.
pub fn payload_from_value(bundle: &Value) -> Value {
    let mut payload = Map::new();
    for key in ["metadata", "data", "assets"] {
        payload.insert(
            key.to_string(),
            bundle.get(key).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(payload)
}

pub fn payload_from_bundle(bundle: &Bundle) -> Result<Value, StoryForgeError> {
    let mut payload = Map::new();
    payload.insert(
        "metadata".to_string(),
        serde_json::to_value(&bundle.metadata).map_err(map_json)?,
    );
    payload.insert(
        "data".to_string(),
        serde_json::to_value(&bundle.data).map_err(map_json)?,
    );
    payload.insert(
        "assets".to_string(),
        serde_json::to_value(&bundle.assets).map_err(map_json)?,
    );
    Ok(Value::Object(payload))
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(values) => {
            out.push('[');
            for (index, entry) in values.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(entry, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// 32-bit rolling hash over UTF-16 code units; a corruption tripwire, not a digest.
pub fn rolling_checksum(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    format!("{:08x}", hash as u32)
}

pub fn compute_for_value(bundle: &Value) -> String {
    sha256_hex(&canonical_json(&payload_from_value(bundle)))
}

pub fn compute_for_bundle(bundle: &Bundle) -> Result<String, StoryForgeError> {
    Ok(sha256_hex(&canonical_json(&payload_from_bundle(bundle)?)))
}

pub fn stamp(bundle: &mut Bundle) -> Result<(), StoryForgeError> {
    bundle.checksum = compute_for_bundle(bundle)?;
    Ok(())
}

/// Checks the stored checksum of an untyped bundle, accepting both digest forms.
pub fn verify_value(bundle: &Value) -> bool {
    let Some(stored) = bundle.get("checksum").and_then(Value::as_str) else {
        return false;
    };
    let canonical = canonical_json(&payload_from_value(bundle));
    match stored.len() {
        SHA256_HEX_LEN => sha256_hex(&canonical) == stored.to_ascii_lowercase(),
        ROLLING_HEX_LEN => rolling_checksum(&canonical) == stored.to_ascii_lowercase(),
        _ => false,
    }
}
