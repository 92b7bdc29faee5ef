//! Cryptographic primitives for the circuit.
//!
//! This module provides:
//! - X25519 Diffie-Hellman key agreement (one ephemeral keypair per
//!   session per side)
//! - ChaCha20-Poly1305 sealed blobs for transfer units
//! - HKDF derivation of the channel key, the payload-sum key, and the
//!   client identity from the shared secret
//! - Secure random generation, including the handshake key marker
//!
//! Secret material is zeroized on drop.

mod aead;
mod exchange;
mod ident;
mod random;

pub use aead::{Aead, AeadKey};
pub use exchange::{Keypair, PublicKey, SharedSecret};
pub use ident::{ChannelKeys, ClientId};
pub use random::{random_marker, SecureRandom};

/// Size of symmetric keys in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of AEAD nonce in bytes (96 bits for ChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 12;

/// Size of AEAD authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of X25519 public keys in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the derived client identity in bytes
pub const CLIENT_ID_SIZE: usize = 16;

/// Size of the truncated payload integrity sum in bytes
pub const SUM_SIZE: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_agreement_and_sealing() {
        // Each side generates an ephemeral keypair for the session
        let client = Keypair::generate();
        let server = Keypair::generate();

        let client_public = client.public();
        let server_public = server.public();

        // Both sides compute the same secret
        let client_shared = client.agree(&server_public);
        let server_shared = server.agree(&client_public);
        assert_eq!(client_shared.as_bytes(), server_shared.as_bytes());

        // Identity and keys are pure functions of the secret
        assert_eq!(
            ClientId::derive(&client_shared),
            ClientId::derive(&server_shared)
        );
        let client_keys = ChannelKeys::derive(&client_shared);
        let server_keys = ChannelKeys::derive(&server_shared);

        // A blob sealed by one side opens on the other
        let sealer = Aead::new(client_keys.data_key());
        let opener = Aead::new(server_keys.data_key());
        let blob = sealer.seal(b"covert payload").unwrap();
        assert_eq!(opener.open(&blob).unwrap(), b"covert payload");
    }
}
