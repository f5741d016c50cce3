//! Canonical encoder.

use bytes::{BufMut, BytesMut};

use super::value::Value;
use super::{
    AI_FALSE, AI_NULL, AI_TRUE, AI_UINT16, AI_UINT32, AI_UINT64, AI_UINT8, MAJOR_ARRAY,
    MAJOR_BYTES, MAJOR_MAP, MAJOR_SIMPLE, MAJOR_TEXT,
};

/// Encode a value to its unique canonical byte string.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(64);
    encode_into(value, &mut buf);
    buf.to_vec()
}

/// Append the canonical encoding of `value` to `buf`.
pub fn encode_into(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Null => buf.put_u8((MAJOR_SIMPLE << 5) | AI_NULL),
        Value::Bool(false) => buf.put_u8((MAJOR_SIMPLE << 5) | AI_FALSE),
        Value::Bool(true) => buf.put_u8((MAJOR_SIMPLE << 5) | AI_TRUE),
        Value::Integer(i) => {
            let (major, arg) = i.to_head();
            write_head(buf, major, arg);
        }
        Value::Text(s) => {
            write_head(buf, MAJOR_TEXT, s.len() as u64);
            buf.put_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            write_head(buf, MAJOR_BYTES, b.len() as u64);
            buf.put_slice(b);
        }
        Value::Array(items) => {
            write_head(buf, MAJOR_ARRAY, items.len() as u64);
            for item in items {
                encode_into(item, buf);
            }
        }
        Value::Map(map) => {
            // Order by encoded key bytes, not by string order: a shorter key
            // always sorts first because its length prefix is smaller.
            let mut entries: Vec<(Vec<u8>, &Value)> = map
                .iter()
                .map(|(k, v)| (encode(&Value::Text(k.clone())), v))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            debug_assert!(entries.windows(2).all(|w| w[0].0 != w[1].0));

            write_head(buf, MAJOR_MAP, entries.len() as u64);
            for (key, value) in entries {
                buf.put_slice(&key);
                encode_into(value, buf);
            }
        }
    }
}

/// Write a major type with the shortest argument encoding that fits.
fn write_head(buf: &mut BytesMut, major: u8, arg: u64) {
    let mt = major << 5;
    match arg {
        0..=23 => buf.put_u8(mt | arg as u8),
        24..=0xff => {
            buf.put_u8(mt | AI_UINT8);
            buf.put_u8(arg as u8);
        }
        0x100..=0xffff => {
            buf.put_u8(mt | AI_UINT16);
            buf.put_u16(arg as u16);
        }
        0x1_0000..=0xffff_ffff => {
            buf.put_u8(mt | AI_UINT32);
            buf.put_u32(arg as u32);
        }
        _ => {
            buf.put_u8(mt | AI_UINT64);
            buf.put_u64(arg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Integer;

    fn hex_of(v: &Value) -> String {
        hex::encode(encode(v))
    }

    #[test]
    fn test_integer_vectors() {
        assert_eq!(hex_of(&Value::from(0u8)), "00");
        assert_eq!(hex_of(&Value::from(23u8)), "17");
        assert_eq!(hex_of(&Value::from(24u8)), "1818");
        assert_eq!(hex_of(&Value::from(100u8)), "1864");
        assert_eq!(hex_of(&Value::from(1000u16)), "1903e8");
        assert_eq!(hex_of(&Value::from(1_000_000u32)), "1a000f4240");
        assert_eq!(hex_of(&Value::from(u64::MAX)), "1bffffffffffffffff");
        assert_eq!(hex_of(&Value::from(-1i8)), "20");
        assert_eq!(hex_of(&Value::from(-10i8)), "29");
        assert_eq!(hex_of(&Value::from(-100i8)), "3863");
        assert_eq!(hex_of(&Value::from(-1000i16)), "3903e7");
        assert_eq!(
            hex_of(&Value::Integer(Integer::new(Integer::MIN).unwrap())),
            "3bffffffffffffffff"
        );
    }

    #[test]
    fn test_boundary_widths() {
        assert_eq!(encode(&Value::from(255u8)).len(), 2);
        assert_eq!(encode(&Value::from(256u16)).len(), 3);
        assert_eq!(encode(&Value::from(65_535u32)).len(), 3);
        assert_eq!(encode(&Value::from(65_536u32)).len(), 5);
        assert_eq!(encode(&Value::from(4_294_967_295u64)).len(), 5);
        assert_eq!(encode(&Value::from(4_294_967_296u64)).len(), 9);
    }

    #[test]
    fn test_simple_and_strings() {
        assert_eq!(hex_of(&Value::Bool(false)), "f4");
        assert_eq!(hex_of(&Value::Bool(true)), "f5");
        assert_eq!(hex_of(&Value::Null), "f6");
        assert_eq!(hex_of(&Value::from("")), "60");
        assert_eq!(hex_of(&Value::from("IETF")), "6449455446");
        assert_eq!(hex_of(&Value::bytes(vec![1, 2, 3, 4])), "4401020304");
        assert_eq!(
            hex_of(&Value::Array(vec![1u8.into(), 2u8.into(), 3u8.into()])),
            "83010203"
        );
    }

    #[test]
    fn test_map_key_order_is_by_encoded_bytes() {
        // "b" (0x61 0x62) sorts before "aa" (0x62 0x61 0x61) because it is shorter.
        let v = Value::map([("aa", Value::from(1u8)), ("b", Value::from(2u8))]);
        assert_eq!(hex_of(&v), "a261620262616101");
    }

    #[test]
    fn test_nested_map_vector() {
        let v = Value::map([
            ("a", Value::from(1u8)),
            ("b", Value::Array(vec![2u8.into(), 3u8.into()])),
        ]);
        assert_eq!(hex_of(&v), "a26161016162820203");
    }
}
