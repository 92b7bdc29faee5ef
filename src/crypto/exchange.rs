//! X25519 key agreement.
//!
//! Both ends of a circuit generate a fresh keypair per session; there
//! is no long-term identity key anywhere in the protocol, which is
//! what makes the handshake a bare public-key exchange rather than an
//! authenticated one.

use x25519_dalek::{
    EphemeralSecret as DalekEphemeral, PublicKey as DalekPublic, SharedSecret as DalekShared,
};

use crate::crypto::PUBLIC_KEY_SIZE;
use crate::error::{Error, Result};

/// A per-session X25519 keypair.
///
/// The secret half is single-use: performing the agreement consumes
/// the keypair, and dalek zeroizes the secret on drop.
pub struct Keypair {
    secret: DalekEphemeral,
    public: DalekPublic,
}

impl Keypair {
    /// Generate a fresh keypair from the thread RNG.
    pub fn generate() -> Self {
        let secret = DalekEphemeral::random_from_rng(rand::thread_rng());
        let public = DalekPublic::from(&secret);
        Self { secret, public }
    }

    /// The public half, safe to put on the wire.
    pub fn public(&self) -> PublicKey {
        PublicKey(self.public)
    }

    /// Perform the Diffie-Hellman agreement, consuming the secret.
    pub fn agree(self, their_public: &PublicKey) -> SharedSecret {
        SharedSecret(self.secret.diffie_hellman(&their_public.0))
    }
}

/// An X25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(DalekPublic);

impl PublicKey {
    /// Decode a public key from raw wire bytes.
    ///
    /// Anything other than exactly [`PUBLIC_KEY_SIZE`] bytes is a
    /// handshake violation.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::handshake(format!("public key must be {} bytes", PUBLIC_KEY_SIZE)))?;
        Ok(Self(DalekPublic::from(arr)))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// The result of the X25519 agreement, fixed for the session lifetime.
pub struct SharedSecret(DalekShared);

impl SharedSecret {
    /// Raw secret bytes; feed these into the KDF, never onto the wire.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_matches() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let alice_public = alice.public();
        let bob_public = bob.public();

        let alice_shared = alice.agree(&bob_public);
        let bob_shared = bob.agree(&alice_public);

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_public_key_wire_roundtrip() {
        let keypair = Keypair::generate();
        let public = keypair.public();

        let restored = PublicKey::from_wire(public.as_bytes()).unwrap();
        assert_eq!(public, restored);
    }

    #[test]
    fn test_short_wire_key_rejected() {
        assert!(matches!(
            PublicKey::from_wire(&[0u8; 16]),
            Err(Error::Handshake(_))
        ));
        assert!(PublicKey::from_wire(&[]).is_err());
    }
}
