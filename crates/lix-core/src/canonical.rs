//! Canonical CBOR encoding for deterministic change identity.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - Floats always use the 64-bit form
//!
//! The canonical encoding is critical: it ensures that the same change content
//! produces identical bytes (and thus identical ids) across all platforms and
//! across independent detector runs.

use ciborium::value::Value;

use crate::types::{ChangeId, EntityId, FileId, SchemaKey};

/// Domain separation prefix for change ids.
pub const CHANGE_ID_DOMAIN: &[u8] = b"lix/change-id/v1";

/// CBOR map key names.
mod keys {
    pub const ENTITY_ID: &str = "entity_id";
    pub const FILE_ID: &str = "file_id";
    pub const PARENT_ID: &str = "parent_id";
    pub const PLUGIN_KEY: &str = "plugin_key";
    pub const SCHEMA_KEY: &str = "schema_key";
    pub const SNAPSHOT: &str = "snapshot";
}

/// The fields that determine a change's identity.
pub struct ChangeContent<'a> {
    pub file_id: &'a FileId,
    pub entity_id: &'a EntityId,
    pub schema_key: &'a SchemaKey,
    pub plugin_key: &'a str,
    pub snapshot: Option<&'a serde_json::Value>,
    pub parent_id: Option<&'a ChangeId>,
}

/// Encode change content to canonical CBOR bytes.
///
/// `created_at` is deliberately absent: re-sending a change never alters its id.
pub fn canonical_change_bytes(content: &ChangeContent<'_>) -> Vec<u8> {
    let snapshot = match content.snapshot {
        Some(value) => json_to_cbor(value),
        None => Value::Null,
    };
    let parent = match content.parent_id {
        Some(id) => Value::Bytes(id.0.to_vec()),
        None => Value::Null,
    };

    let entries = vec![
        (text(keys::FILE_ID), text(content.file_id.as_str())),
        (text(keys::ENTITY_ID), text(content.entity_id.as_str())),
        (text(keys::SCHEMA_KEY), text(content.schema_key.as_str())),
        (text(keys::PLUGIN_KEY), text(content.plugin_key)),
        (text(keys::SNAPSHOT), snapshot),
        (text(keys::PARENT_ID), parent),
    ];

    encode_cbor_value_canonical(&Value::Map(entries))
}

/// Encode an arbitrary JSON value canonically.
///
/// Used wherever an identity must be derived from structured content,
/// e.g. content-derived entity ids.
pub fn canonical_json_bytes(value: &serde_json::Value) -> Vec<u8> {
    encode_cbor_value_canonical(&json_to_cbor(value))
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

/// Convert a JSON value to a CBOR value.
fn json_to_cbor(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Integer(u.into())
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_cbor).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Value::Text(k.clone()), json_to_cbor(v)))
                .collect(),
        ),
    }
}

/// Encode a CBOR Value to canonical bytes.
fn encode_cbor_value_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr),
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Tag(tag, inner) => {
            encode_uint(buf, 6, *tag);
            encode_value_to(buf, inner);
        }
        // Never produced by `json_to_cbor`; encoded as CBOR `undefined`.
        _ => buf.push(0xf7),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode an array (major type 4).
fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, key_value_pairs.len() as u64);

    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content<'a>(
        file_id: &'a FileId,
        entity_id: &'a EntityId,
        schema_key: &'a SchemaKey,
        snapshot: Option<&'a serde_json::Value>,
    ) -> ChangeContent<'a> {
        ChangeContent {
            file_id,
            entity_id,
            schema_key,
            plugin_key: "csv",
            snapshot,
            parent_id: None,
        }
    }

    #[test]
    fn test_canonical_encoding_deterministic() {
        let file_id = FileId::new("f1");
        let entity_id = EntityId::new("Stakeholder|Anna");
        let schema_key = SchemaKey::new("csv_row_v1").unwrap();
        let snapshot = json!({"values": {"Stakeholder": "Anna", "Role": "PM"}});

        let b1 = canonical_change_bytes(&content(&file_id, &entity_id, &schema_key, Some(&snapshot)));
        let b2 = canonical_change_bytes(&content(&file_id, &entity_id, &schema_key, Some(&snapshot)));
        assert_eq!(b1, b2);
    }

    #[test]
    fn test_object_key_order_is_irrelevant() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b": 1, "a": [true, null]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a": [true, null], "b": 1}"#).unwrap();
        assert_eq!(canonical_json_bytes(&a), canonical_json_bytes(&b));
    }

    #[test]
    fn test_tombstone_differs_from_null_free_snapshot() {
        let file_id = FileId::new("f1");
        let entity_id = EntityId::new("header");
        let schema_key = SchemaKey::new("csv_header_v1").unwrap();
        let snapshot = json!({"columns": []});

        let live = canonical_change_bytes(&content(&file_id, &entity_id, &schema_key, Some(&snapshot)));
        let dead = canonical_change_bytes(&content(&file_id, &entity_id, &schema_key, None));
        assert_ne!(live, dead);
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();

        encode_uint(&mut buf, 0, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, vec![0x19, 0x01, 0x00]);

        buf.clear();
        encode_integer(&mut buf, (-1i64).into());
        assert_eq!(buf, vec![0x20]);
    }

    #[test]
    fn test_map_key_ordering() {
        let mut buf = Vec::new();
        let entries = vec![
            (Value::Integer(8.into()), Value::Integer(80.into())),
            (Value::Integer(0.into()), Value::Integer(0.into())),
            (Value::Integer(5.into()), Value::Integer(50.into())),
        ];
        encode_map_canonical(&mut buf, &entries);

        assert_eq!(buf[0], 0xa3);
        assert_eq!(buf[1], 0x00); // key 0
        assert_eq!(buf[2], 0x00);
        assert_eq!(buf[3], 0x05); // key 5
        assert_eq!(buf[4], 0x18);
        assert_eq!(buf[5], 50);
        assert_eq!(buf[6], 0x08); // key 8
    }

    #[test]
    fn test_float_encoding_is_stable() {
        let v = json!(1.5);
        let bytes = canonical_json_bytes(&v);
        assert_eq!(bytes[0], 0xfb);
        assert_eq!(bytes.len(), 9);
    }
}
