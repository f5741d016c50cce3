//! Canonical deterministic encoding.
//!
//! A CBOR subset with exactly one valid byte string per logical value:
//!
//! - definite lengths only
//! - integers and lengths in shortest form
//! - map keys are text, unique, and ordered by their encoded bytes
//! - no floats, tags or simple values beyond `false`, `true` and `null`
//!
//! Every signature and fingerprint in this crate is computed over this
//! encoding, so the byte layout is a stable wire contract.
//!
//! ```text
//!  initial byte        argument (0/1/2/4/8 bytes, big-endian)     payload
//! ┌───────┬─────────┐ ┌──────────────────────────────────────┐ ┌─────────┐
//! │ major │  info   │ │ present only when info is 24..=27     │ │ strings │
//! │ 3 bits│ 5 bits  │ └──────────────────────────────────────┘ │ items   │
//! └───────┴─────────┘                                           └─────────┘
//! ```

mod decode;
mod encode;
mod value;

pub use decode::decode;
pub use encode::{encode, encode_into};
pub use value::{Integer, Value};

use crate::crypto;

pub(crate) const MAJOR_UNSIGNED: u8 = 0;
pub(crate) const MAJOR_NEGATIVE: u8 = 1;
pub(crate) const MAJOR_BYTES: u8 = 2;
pub(crate) const MAJOR_TEXT: u8 = 3;
pub(crate) const MAJOR_ARRAY: u8 = 4;
pub(crate) const MAJOR_MAP: u8 = 5;
pub(crate) const MAJOR_SIMPLE: u8 = 7;

pub(crate) const AI_FALSE: u8 = 20;
pub(crate) const AI_TRUE: u8 = 21;
pub(crate) const AI_NULL: u8 = 22;
pub(crate) const AI_UINT8: u8 = 24;
pub(crate) const AI_UINT16: u8 = 25;
pub(crate) const AI_UINT32: u8 = 26;
pub(crate) const AI_UINT64: u8 = 27;
pub(crate) const AI_INDEFINITE: u8 = 31;

/// Maximum nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 128;

/// SHA-256 of the canonical encoding.
pub fn hash(value: &Value) -> [u8; 32] {
    crypto::sha256(&encode(value))
}

/// Check a value against an expected canonical hash in constant time.
pub fn verify_hash(value: &Value, expected: &[u8; 32]) -> bool {
    crypto::constant_time_eq(&hash(value), expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Distinct keys in arbitrary order.
    fn shuffled_entries() -> impl Strategy<Value = Vec<(String, i64)>> {
        proptest::collection::btree_map("[a-z]{0,6}", any::<i64>(), 0..16)
            .prop_flat_map(|m| Just(m.into_iter().collect::<Vec<_>>()).prop_shuffle())
    }

    /// A map written entry by entry in the given order.
    fn map_bytes(entries: &[(String, i64)]) -> Vec<u8> {
        let mut bytes = vec![(MAJOR_MAP << 5) | entries.len() as u8];
        for (k, v) in entries {
            bytes.extend_from_slice(&encode(&Value::from(k.as_str())));
            bytes.extend_from_slice(&encode(&Value::from(*v)));
        }
        bytes
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<u64>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            (Integer::MIN..=Integer::MAX).prop_map(|n| Value::Integer(Integer::new(n).unwrap())),
            ".{0,12}".prop_map(Value::Text),
            proptest::collection::vec(any::<u8>(), 0..24).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                proptest::collection::btree_map(".{0,8}", inner, 0..8).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_roundtrip(v in arb_value()) {
            let bytes = encode(&v);
            prop_assert_eq!(decode(&bytes).unwrap(), v);
        }

        #[test]
        fn prop_only_sorted_key_order_decodes(entries in shuffled_entries()) {
            let expected = Value::map(entries.iter().map(|(k, v)| (k.clone(), Value::from(*v))));
            let written = map_bytes(&entries);

            let mut sorted = entries.clone();
            sorted.sort_by_key(|(k, _)| encode(&Value::from(k.as_str())));
            prop_assert_eq!(encode(&expected), map_bytes(&sorted));

            if entries == sorted {
                prop_assert_eq!(decode(&written).unwrap(), expected);
            } else {
                prop_assert!(matches!(decode(&written), Err(DecodeError::UnsortedMapKeys(_))));
            }
        }

        #[test]
        fn prop_single_byte_corruption_never_decodes_to_same_value(
            v in arb_value(),
            idx in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut bytes = encode(&v);
            let i = idx.index(bytes.len());
            bytes[i] ^= flip;
            if let Ok(decoded) = decode(&bytes) {
                // A different byte string can only decode to a different value.
                prop_assert_ne!(decoded, v);
            }
        }
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = Value::map([("x", Value::from(1u8)), ("y", Value::from(2u8))]);
        let mut m = BTreeMap::new();
        m.insert("y".to_string(), Value::from(2u8));
        m.insert("x".to_string(), Value::from(1u8));
        let b = Value::Map(m);
        assert_eq!(hash(&a), hash(&b));
        assert!(verify_hash(&b, &hash(&a)));
        assert!(!verify_hash(&Value::Null, &hash(&a)));
    }
}
