//! RFC 4648 base32, lowercase, unpadded.
//!
//! Decoding is strict: only `a-z2-7`, no padding, and the unused low bits of
//! the final symbol must be zero so every byte string has one spelling.

use crate::error::{Error, Result};

const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Number of symbols needed for `len` bytes.
pub(crate) const fn encoded_len(len: usize) -> usize {
    (len * 8 + 4) / 5
}

/// Encode bytes.
pub(crate) fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(encoded_len(bytes.len()));
    let mut buffer: u16 = 0;
    let mut bits = 0u32;

    for &byte in bytes {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[usize::from((buffer >> bits) & 0x1f)] as char);
        }
        buffer &= (1 << bits) - 1;
    }

    if bits > 0 {
        out.push(ALPHABET[usize::from((buffer << (5 - bits)) & 0x1f)] as char);
    }

    out
}

fn symbol_value(c: char) -> Result<u16> {
    match c {
        'a'..='z' => Ok(c as u16 - 'a' as u16),
        '2'..='7' => Ok(c as u16 - '2' as u16 + 26),
        _ => Err(Error::InvalidCharacter(c)),
    }
}

/// Decode a string produced by [`encode`].
pub(crate) fn decode(s: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u16 = 0;
    let mut bits = 0u32;

    for c in s.chars() {
        buffer = (buffer << 5) | symbol_value(c)?;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
        buffer &= (1 << bits) - 1;
    }

    // Leftover bits are padding; a whole spare symbol or set bits means the
    // string is not what encode() would have produced.
    if bits >= 5 || buffer != 0 {
        return Err(Error::NonCanonicalName);
    }

    Ok(out)
}
