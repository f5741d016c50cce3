//! Strict canonical decoder.
//!
//! Accepts exactly the byte strings [`encode`](super::encode) can produce.
//! Anything else, including encodings a lenient CBOR reader would accept,
//! is rejected with a [`DecodeError`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::value::{Integer, Value};
use super::{
    AI_FALSE, AI_INDEFINITE, AI_NULL, AI_TRUE, AI_UINT16, AI_UINT32, AI_UINT64, AI_UINT8,
    MAJOR_ARRAY, MAJOR_BYTES, MAJOR_MAP, MAJOR_NEGATIVE, MAJOR_SIMPLE, MAJOR_TEXT,
    MAJOR_UNSIGNED, MAX_DEPTH,
};
use crate::error::DecodeError;

type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Upper bound on elements reserved up front for a declared array length.
const MAX_PREALLOC: usize = 1024;

/// Elements to reserve for an array of `len`. The declared length is only
/// bounded by the input size, so the reservation is capped as well.
fn prealloc(len: usize) -> usize {
    len.min(MAX_PREALLOC)
}

/// Decode a single canonical item that spans all of `bytes`.
pub fn decode(bytes: &[u8]) -> DecodeResult<Value> {
    let mut decoder = Decoder { data: bytes, pos: 0 };
    let value = decoder.value(0)?;
    if decoder.pos != bytes.len() {
        return Err(DecodeError::TrailingBytes(bytes.len() - decoder.pos));
    }
    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEnd(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read the argument that follows an initial byte, enforcing shortest form.
    fn argument(&mut self, info: u8, offset: usize) -> DecodeResult<u64> {
        let (value, floor) = match info {
            0..=23 => return Ok(u64::from(info)),
            AI_UINT8 => (u64::from(self.take_array::<1>()?[0]), 24),
            AI_UINT16 => (u64::from(u16::from_be_bytes(self.take_array()?)), 0x100),
            AI_UINT32 => (u64::from(u32::from_be_bytes(self.take_array()?)), 0x1_0000),
            AI_UINT64 => (u64::from_be_bytes(self.take_array()?), 0x1_0000_0000),
            AI_INDEFINITE => return Err(DecodeError::IndefiniteLength(offset)),
            _ => return Err(DecodeError::ReservedAdditionalInfo { offset, info }),
        };
        if value < floor {
            return Err(DecodeError::NonShortestForm(offset));
        }
        Ok(value)
    }

    /// Read a length and make sure the input could possibly hold that many units.
    fn length(&mut self, info: u8, offset: usize) -> DecodeResult<usize> {
        let len = self.argument(info, offset)?;
        match usize::try_from(len) {
            Ok(len) if len <= self.remaining() => Ok(len),
            _ => Err(DecodeError::UnexpectedEnd(self.pos)),
        }
    }

    fn value(&mut self, depth: usize) -> DecodeResult<Value> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::DepthLimitExceeded(MAX_DEPTH));
        }

        let offset = self.pos;
        let initial = self.take_array::<1>()?[0];
        let major = initial >> 5;
        let info = initial & 0x1f;

        match major {
            MAJOR_UNSIGNED => {
                let arg = self.argument(info, offset)?;
                Ok(Value::Integer(Integer::from(arg)))
            }
            MAJOR_NEGATIVE => {
                let arg = self.argument(info, offset)?;
                let n = -1 - i128::from(arg);
                Integer::new(n)
                    .map(Value::Integer)
                    .ok_or(DecodeError::UnexpectedValue("integer".into()))
            }
            MAJOR_BYTES => {
                let len = self.length(info, offset)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            MAJOR_TEXT => {
                let len = self.length(info, offset)?;
                let raw = self.take(len)?;
                let text = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8(offset))?;
                Ok(Value::Text(text.to_owned()))
            }
            MAJOR_ARRAY => {
                // Every element takes at least one byte.
                let len = self.length(info, offset)?;
                let mut items = Vec::with_capacity(prealloc(len));
                for _ in 0..len {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            MAJOR_MAP => self.map(info, offset, depth),
            MAJOR_SIMPLE => match info {
                AI_FALSE => Ok(Value::Bool(false)),
                AI_TRUE => Ok(Value::Bool(true)),
                AI_NULL => Ok(Value::Null),
                AI_UINT16 | AI_UINT32 | AI_UINT64 => Err(DecodeError::FloatProhibited(offset)),
                AI_INDEFINITE => Err(DecodeError::IndefiniteLength(offset)),
                28..=30 => Err(DecodeError::ReservedAdditionalInfo { offset, info }),
                _ => Err(DecodeError::UnsupportedSimpleValue { offset, value: info }),
            },
            // Tags (major type 6)
            _ => Err(DecodeError::UnsupportedMajorType { offset, major }),
        }
    }

    fn map(&mut self, info: u8, offset: usize, depth: usize) -> DecodeResult<Value> {
        // Every entry takes at least two bytes.
        let len = self.length(info, offset)?;
        if len > self.remaining() / 2 {
            return Err(DecodeError::UnexpectedEnd(self.pos));
        }

        let mut map = BTreeMap::new();
        let mut previous: Option<&'a [u8]> = None;

        for _ in 0..len {
            let key_start = self.pos;
            let key = match self.value(depth + 1)? {
                Value::Text(key) => key,
                _ => return Err(DecodeError::NonTextMapKey(key_start)),
            };
            // The key was decoded strictly, so its raw bytes are its canonical encoding.
            let key_bytes = &self.data[key_start..self.pos];

            if let Some(prev) = previous {
                match prev.cmp(key_bytes) {
                    Ordering::Less => {}
                    Ordering::Equal => return Err(DecodeError::DuplicateMapKey(key)),
                    Ordering::Greater => return Err(DecodeError::UnsortedMapKeys(key)),
                }
            }
            previous = Some(key_bytes);

            let value = self.value(depth + 1)?;
            map.insert(key, value);
        }

        Ok(Value::Map(map))
    }
}
