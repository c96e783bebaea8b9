//! SHA-256 helpers shared by identifiers, evidence, and the portal.
//!
//! All digests over multi-field inputs use length-prefixed framing so that
//! field boundaries survive concatenation. Canonical JSON relies on
//! `serde_json`'s sorted object keys plus compact separators, matching the
//! encoding the evidence backend hashes.

use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const HASH_BYTES: usize = 32;

pub fn sha256(data: &[u8]) -> [u8; HASH_BYTES] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Digest over framed fields: each field is preceded by its length as a
/// little-endian u64.
pub fn sha256_frames(fields: &[&[u8]]) -> [u8; HASH_BYTES] {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hasher.finalize().into()
}

pub fn sha256_frames_hex(fields: &[&[u8]]) -> String {
    hex::encode(sha256_frames(fields))
}

/// Compact JSON with sorted keys. `serde_json`'s default map is ordered by
/// key, so serializing a `Value` is already canonical.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// Timing-safe equality for digests and MACs.
pub fn ct_eq(left: &[u8], right: &[u8]) -> bool {
    left.ct_eq(right).into()
}

/// Timing-safe equality of two lowercase-hex digest strings.
pub fn ct_eq_hex(left: &str, right: &str) -> bool {
    let (Ok(left), Ok(right)) = (hex::decode(left), hex::decode(right)) else {
        return false;
    };
    ct_eq(&left, &right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framed_digest_is_boundary_sensitive() {
        let joined = sha256_frames(&[b"ab", b"c"]);
        let split = sha256_frames(&[b"a", b"bc"]);
        assert_ne!(joined, split);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value: Value = serde_json::from_str(r#"{"b":1,"a":{"z":2,"y":3}}"#).unwrap();
        assert_eq!(canonical_json(&value), r#"{"a":{"y":3,"z":2},"b":1}"#);
    }

    #[test]
    fn ct_eq_hex_rejects_garbage() {
        assert!(!ct_eq_hex("zz", "zz"));
        let digest = sha256_hex(b"x");
        assert!(ct_eq_hex(&digest, &digest));
    }
}
