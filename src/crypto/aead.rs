//! Authenticated encryption for transfer units.
//!
//! ChaCha20-Poly1305, software-fast and constant-time. Every sealed
//! blob is self-contained: `nonce || ciphertext || tag`, with a fresh
//! random nonce per seal. Frames travel as independent POST bodies, so
//! there is no counter state the two ends could keep in step.

use chacha20poly1305::{
    aead::{Aead as AeadTrait, KeyInit, Payload},
    ChaCha20Poly1305,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{SecureRandom, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

/// A symmetric key for sealing transfer units.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes; secret material.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// ChaCha20-Poly1305 cipher bound to one session key.
pub struct Aead {
    cipher: ChaCha20Poly1305,
}

impl Aead {
    /// Create a cipher instance for the given key.
    pub fn new(key: AeadKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// Seal plaintext into a self-contained blob.
    ///
    /// Returns `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce: [u8; NONCE_SIZE] = SecureRandom::bytes();

        let ciphertext = self
            .cipher
            .encrypt(
                (&nonce).into(),
                Payload {
                    msg: plaintext,
                    aad: b"",
                },
            )
            .map_err(|_| Error::crypto("encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Open a blob produced by [`seal`](Self::seal).
    ///
    /// Fails when the blob is truncated, tampered with, or sealed
    /// under a different key.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::crypto(format!(
                "sealed blob too short: {} bytes",
                blob.len()
            )));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().expect("split at NONCE_SIZE");

        self.cipher
            .decrypt(
                (&nonce).into(),
                Payload {
                    msg: ciphertext,
                    aad: b"",
                },
            )
            .map_err(|_| Error::crypto("decryption/authentication failed"))
    }
}
