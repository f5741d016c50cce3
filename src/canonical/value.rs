//! The closed set of values the canonical codec can carry.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// An integer in the range `[-2^64, 2^64 - 1]`.
///
/// This is exactly the range a major-type 0 or 1 item can express, so every
/// `Integer` has one encoding and every decoded integer fits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Integer(i128);

impl Integer {
    /// Smallest representable value, `-2^64`.
    pub const MIN: i128 = -(1i128 << 64);
    /// Largest representable value, `2^64 - 1`.
    pub const MAX: i128 = (1i128 << 64) - 1;

    /// Create from an `i128`, returning `None` outside the encodable range.
    pub fn new(value: i128) -> Option<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// The value as an `i128`.
    pub fn as_i128(self) -> i128 {
        self.0
    }

    /// The value as a `u64`, if non-negative.
    pub fn as_u64(self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }

    /// The value as an `i64`, if it fits.
    pub fn as_i64(self) -> Option<i64> {
        i64::try_from(self.0).ok()
    }

    /// Split into (major type, argument) for the wire.
    pub(crate) fn to_head(self) -> (u8, u64) {
        if self.0 >= 0 {
            (super::MAJOR_UNSIGNED, self.0 as u64)
        } else {
            (super::MAJOR_NEGATIVE, (-1 - self.0) as u64)
        }
    }
}

macro_rules! integer_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Integer {
                fn from(v: $t) -> Self {
                    Integer(v as i128)
                }
            }

            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Integer(Integer::from(v))
                }
            }
        )*
    };
}

integer_from!(u8, u16, u32, u64, i8, i16, i32, i64, usize);

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A canonical value.
///
/// Floating point is deliberately absent. Maps are keyed by text and hold
/// each key once; the codec, not the map, decides the wire order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Integer(Integer),
    /// UTF-8 text string
    Text(String),
    /// Opaque byte string
    Bytes(Vec<u8>),
    /// Ordered sequence
    Array(Vec<Value>),
    /// Text-keyed map
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map from `(key, value)` pairs. Later duplicates replace earlier ones.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a byte string value.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(bytes.into())
    }

    /// Build an array of text values.
    pub fn text_array<S: AsRef<str>>(items: &[S]) -> Self {
        Value::Array(items.iter().map(|s| Value::Text(s.as_ref().to_owned())).collect())
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Get a map entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is one.
    pub fn as_integer(&self) -> Option<Integer> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The integer as a `u64`, if it is one and non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_integer().and_then(Integer::as_u64)
    }

    /// The text, if this is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The bytes, if this is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The items, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The entries, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Required map field lookup used when rebuilding typed records.
    pub(crate) fn field(&self, key: &str) -> Result<&Value> {
        self.get(key).ok_or_else(|| Error::unexpected(key))
    }

    pub(crate) fn text_field(&self, key: &str) -> Result<&str> {
        self.field(key)?.as_text().ok_or_else(|| Error::unexpected(key))
    }

    pub(crate) fn u64_field(&self, key: &str) -> Result<u64> {
        self.field(key)?.as_u64().ok_or_else(|| Error::unexpected(key))
    }

    pub(crate) fn bytes_field(&self, key: &str) -> Result<&[u8]> {
        self.field(key)?.as_bytes().ok_or_else(|| Error::unexpected(key))
    }

    pub(crate) fn text_list_field(&self, key: &str) -> Result<Vec<String>> {
        self.field(key)?
            .as_array()
            .ok_or_else(|| Error::unexpected(key))?
            .iter()
            .map(|v| v.as_text().map(str::to_owned).ok_or_else(|| Error::unexpected(key)))
            .collect()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<Integer> for Value {
    fn from(i: Integer) -> Self {
        Value::Integer(i)
    }
}

/// JSON-friendly view used for alerts and reports. Bytes render as hex.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => match (i.as_u64(), i.as_i64()) {
                (Some(u), _) => serializer.serialize_u64(u),
                (None, Some(n)) => serializer.serialize_i64(n),
                (None, None) => serializer.serialize_str(&i.to_string()),
            },
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_str(&hex::encode(b)),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_range() {
        assert!(Integer::new(Integer::MAX).is_some());
        assert!(Integer::new(Integer::MIN).is_some());
        assert!(Integer::new(Integer::MAX + 1).is_none());
        assert!(Integer::new(Integer::MIN - 1).is_none());
    }

    #[test]
    fn test_integer_head() {
        assert_eq!(Integer::from(0u8).to_head(), (0, 0));
        assert_eq!(Integer::from(-1i8).to_head(), (1, 0));
        assert_eq!(Integer::from(-500i32).to_head(), (1, 499));
        assert_eq!(Integer::new(Integer::MIN).unwrap().to_head(), (1, u64::MAX));
    }

    #[test]
    fn test_map_builder_replaces_duplicates() {
        let v = Value::map([("a", Value::from(1u8)), ("a", Value::from(2u8))]);
        assert_eq!(v.as_map().unwrap().len(), 1);
        assert_eq!(v.get("a").and_then(Value::as_u64), Some(2));
    }

    #[test]
    fn test_json_view() {
        let v = Value::map([
            ("b", Value::bytes(vec![0xde, 0xad])),
            ("n", Value::from(-3i64)),
            ("t", Value::from("x")),
        ]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"b":"dead","n":-3,"t":"x"}"#);
    }
}
