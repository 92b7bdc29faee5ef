//! Secure random generation.
//!
//! Nonces and handshake markers come from the operating system's
//! entropy source.

use rand::RngCore;
use rand_core::OsRng;

/// Cryptographically secure random generator backed by the OS.
pub struct SecureRandom;

impl SecureRandom {
    /// Fill a buffer with random bytes.
    pub fn fill(dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    /// Generate a fixed-size array of random bytes.
    pub fn bytes<const N: usize>() -> [u8; N] {
        let mut buf = [0u8; N];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    /// Generate a random u64.
    pub fn u64() -> u64 {
        OsRng.next_u64()
    }
}

/// Draw a random marker string of `len` characters from `charset`.
///
/// The marker is the form key of the handshake POST; it carries no
/// meaning beyond "not a known client-id", so any draw from the
/// configured alphabet works.
pub fn random_marker(charset: &str, len: usize) -> String {
    let chars: Vec<char> = charset.chars().collect();
    (0..len)
        .map(|_| chars[(SecureRandom::u64() % chars.len() as u64) as usize])
        .collect()
}
