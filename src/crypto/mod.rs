//! Cryptographic primitives for dkcloak.
//!
//! This module provides:
//! - Ed25519 signatures (identities, claims, registry countersignatures)
//! - SHA-256 hashing for node IDs and template fingerprints
//! - Constant-time comparison
//! - Secure random number generation
//!
//! All secret material is zeroized on drop to prevent memory leakage.

mod keys;
pub(crate) mod random;

pub use keys::{key_share, verify, PublicKey, Signature, SigningSecret};
pub use random::{perturb_within, SecureRandom};

use sha2::{Digest, Sha256};

/// Size of an Ed25519 seed in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of an Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 over the concatenation of several parts.
pub fn sha256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Constant-time comparison to prevent timing attacks.
///
/// Length is not secret; only the contents are compared without early exit.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
