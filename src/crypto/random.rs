//! Secure random number generation.
//!
//! Provides cryptographically secure random bytes using the operating
//! system's entropy source.

use rand::{Rng, RngCore};
use rand_core::OsRng;

/// Cryptographically secure random number generator.
///
/// Wraps the OS-provided entropy source (e.g., /dev/urandom on Unix,
/// BCryptGenRandom on Windows).
pub struct SecureRandom;

impl SecureRandom {
    /// Fill a buffer with cryptographically secure random bytes.
    pub fn fill(dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    /// Generate a fixed-size array of random bytes.
    pub fn bytes<const N: usize>() -> [u8; N] {
        let mut buf = [0u8; N];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    /// Uniform offset in `[-magnitude, magnitude]`.
    pub fn jitter(magnitude: u64) -> i128 {
        if magnitude == 0 {
            return 0;
        }
        let m = i128::from(magnitude);
        OsRng.gen_range(-m..=m)
    }
}

/// Perturb `value` by a uniform amount within `percent` of itself.
///
/// The bound is `floor(value * percent / 100)`, so the result always passes
/// a tolerance check at the same percentage.
pub fn perturb_within(value: u64, percent: u8) -> u64 {
    let bound = (u128::from(value) * u128::from(percent) / 100) as u64;
    let shifted = i128::from(value) + SecureRandom::jitter(bound);
    shifted.clamp(0, i128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_secure_random_fill() {
        let mut buf1 = [0u8; 32];
        let mut buf2 = [0u8; 32];

        SecureRandom::fill(&mut buf1);
        SecureRandom::fill(&mut buf2);

        // Should not produce all zeros
        assert!(!buf1.iter().all(|&b| b == 0));
        assert!(!buf2.iter().all(|&b| b == 0));

        // Should produce different values each time
        assert_ne!(buf1, buf2);
    }

    #[test]
    fn test_secure_random_bytes() {
        let bytes1: [u8; 16] = SecureRandom::bytes();
        let bytes2: [u8; 16] = SecureRandom::bytes();

        assert_ne!(bytes1, bytes2);
    }

    #[test]
    fn test_jitter_bounds() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let j = SecureRandom::jitter(50);
            assert!((-50..=50).contains(&j));
            seen.insert(j);
        }
        assert!(seen.len() > 1);
        assert_eq!(SecureRandom::jitter(0), 0);
    }

    #[test]
    fn test_perturb_within_stays_in_tolerance() {
        for _ in 0..500 {
            let v = perturb_within(65_535, 10);
            // floor(65535 * 10 / 100) = 6553
            assert!((65_535 - 6_553..=65_535 + 6_553).contains(&v));
        }
        // Zero and tiny values cannot move
        assert_eq!(perturb_within(0, 10), 0);
        assert_eq!(perturb_within(9, 10), 9);
    }
}
