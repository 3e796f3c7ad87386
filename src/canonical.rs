//! Canonical JSON encoding and the pre-authentication encoding (PAE).
//!
//! Every byte that is hashed or signed anywhere in this crate comes from
//! [`encode`]. Parsers may accept arbitrary whitespace and key order; the
//! encoder collapses all of that into a single deterministic byte stream.

use std::cmp::Ordering;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonically encode a JSON value to bytes.
///
/// Rules:
/// - object keys sorted by UTF-16 code-unit order;
/// - no insignificant whitespace;
/// - numbers in their shortest round-tripping decimal form;
/// - strings minimally escaped: control characters, `"`, `\`, and the
///   JS-hostile U+2028/U+2029;
/// - `null`, `true`, `false` as literals.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

/// SHA-256 over canonical bytes, rendered as `"sha256:" + 64 lowercase hex`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Canonicalize a value and return its formatted SHA-256 hash.
pub fn encode_and_hash(value: &Value) -> (Vec<u8>, String) {
    let bytes = encode(value);
    let hash = sha256_hex(&bytes);
    (bytes, hash)
}

/// Build the pre-authentication encoding that binds a payload type to a
/// payload before signing:
///
/// ```text
/// "DSSEv1" SP len(type) SP type SP len(payload) SP payload
/// ```
///
/// `len(x)` is the ASCII decimal byte length and `SP` is a single 0x20 byte.
/// This deliberately diverges from upstream DSSE (8-byte little-endian
/// lengths); binary-length envelopes are never produced nor accepted, and
/// interoperability with generic verifiers is a non-goal.
pub fn pre_auth_encoding(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_bytes = payload_type.as_bytes();
    let type_len = type_bytes.len().to_string();
    let payload_len = payload.len().to_string();

    let mut out = Vec::with_capacity(
        6 + 4 + type_len.len() + type_bytes.len() + payload_len.len() + payload.len(),
    );
    out.extend_from_slice(b"DSSEv1");
    out.push(b' ');
    out.extend_from_slice(type_len.as_bytes());
    out.push(b' ');
    out.extend_from_slice(type_bytes);
    out.push(b' ');
    out.extend_from_slice(payload_len.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            // serde_json renders integers via itoa and floats via ryu, which
            // is already the shortest round-tripping decimal form.
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| utf16_cmp(a, b));
            out.push(b'{');
            for (idx, (key, val)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(val, out);
            }
            out.push(b'}');
        }
    }
}

/// Compare two strings by their UTF-16 code-unit sequences.
///
/// This differs from byte order only for strings containing supplementary
/// plane characters (surrogate pairs sort below U+E000..U+FFFF).
fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\t' => out.extend_from_slice(b"\\t"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\u{0c}' => out.extend_from_slice(b"\\f"),
            '\r' => out.extend_from_slice(b"\\r"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            '\u{2028}' => out.extend_from_slice(b"\\u2028"),
            '\u{2029}' => out.extend_from_slice(b"\\u2029"),
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted() {
        let value = json!({
            "description": "Installs a skill",
            "name": "install",
            "parameters": { "b": "integer", "a": "integer" }
        });
        let encoded = String::from_utf8(encode(&value)).unwrap();
        assert_eq!(
            encoded,
            r#"{"description":"Installs a skill","name":"install","parameters":{"a":"integer","b":"integer"}}"#
        );
    }

    #[test]
    fn test_arrays_preserve_order() {
        let value = json!({ "items": [3, 1, 2], "name": "test" });
        let encoded = String::from_utf8(encode(&value)).unwrap();
        assert_eq!(encoded, r#"{"items":[3,1,2],"name":"test"}"#);
    }

    #[test]
    fn test_key_order_independence() {
        let a = json!({"z": 1, "a": 2, "m": 3});
        let b = json!({"a": 2, "m": 3, "z": 1});
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn test_idempotence() {
        let value = json!({
            "nested": {"z": [true, null, 1.5], "a": "x\ny"},
            "top": "line\u{2028}sep"
        });
        let once = encode(&value);
        let reparsed: Value = serde_json::from_slice(&once).unwrap();
        let twice = encode(&reparsed);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_minimal_escaping() {
        let value = json!({"s": "quote\" back\\ tab\t ls\u{2028} ps\u{2029} bell\u{07} cafe\u{e9}"});
        let encoded = String::from_utf8(encode(&value)).unwrap();
        assert!(encoded.contains(r#"quote\""#));
        assert!(encoded.contains(r"back\\"));
        assert!(encoded.contains(r"tab\t"));
        assert!(encoded.contains(r"ls\u2028"));
        assert!(encoded.contains(r"ps\u2029"));
        assert!(encoded.contains(r"bell\u0007"));
        // Non-ASCII outside the escape set stays raw UTF-8.
        assert!(encoded.contains('\u{e9}'));
    }

    #[test]
    fn test_utf16_key_order_supplementary() {
        // U+10000 encodes to the surrogate pair D800 DC00, which sorts below
        // U+FF21 in UTF-16 code-unit order (but above it in byte order).
        let value = json!({"\u{ff21}": 1, "\u{10000}": 2});
        let encoded = String::from_utf8(encode(&value)).unwrap();
        let supplementary = encoded.find('\u{10000}').unwrap();
        let bmp = encoded.find('\u{ff21}').unwrap();
        assert!(supplementary < bmp, "surrogate pair must sort first: {}", encoded);
    }

    #[test]
    fn test_number_forms() {
        let value = json!({"i": 42, "neg": -7, "f": 1.5, "zero": 0});
        let encoded = String::from_utf8(encode(&value)).unwrap();
        assert_eq!(encoded, r#"{"f":1.5,"i":42,"neg":-7,"zero":0}"#);
    }

    #[test]
    fn test_sha256_hex_format() {
        let hash = sha256_hex(b"hello");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), 7 + 64);
        assert_eq!(hash, sha256_hex(b"hello"));
    }

    #[test]
    fn test_pae_layout() {
        let pae = pre_auth_encoding("application/test", b"abc");
        assert_eq!(pae, b"DSSEv1 16 application/test 3 abc");
    }

    #[test]
    fn test_pae_empty_payload() {
        let pae = pre_auth_encoding("t", b"");
        assert_eq!(pae, b"DSSEv1 1 t 0 ");
    }

    #[test]
    fn test_pae_injective() {
        // Shifting bytes between type and payload always changes the
        // encoded lengths, so these must all differ.
        let a = pre_auth_encoding("ab", b"c");
        let b = pre_auth_encoding("a", b"bc");
        let c = pre_auth_encoding("abc", b"");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_encode_and_hash_stable() {
        let a = json!({"y": 2, "x": 1});
        let b = json!({"x": 1, "y": 2});
        assert_eq!(encode_and_hash(&a).1, encode_and_hash(&b).1);
    }
}
