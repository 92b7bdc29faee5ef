//! Session identity and key derivation.
//!
//! Everything a session needs beyond the raw agreement comes out of
//! the shared secret deterministically: the 16-byte client identity
//! (a SHA-256 prefix), the channel data key, and the payload-sum key
//! (both via HKDF-SHA256). Both ends derive identical values, which
//! is what lets the client-id double as the registry key and the form
//! key without any further negotiation.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{AeadKey, SharedSecret, CLIENT_ID_SIZE, KEY_SIZE, SUM_SIZE};

/// HKDF salt binding derived keys to this protocol revision.
const KDF_SALT: &[u8] = b"gatepost-v1";

/// The 16-byte session identity, a pure function of the shared secret.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId([u8; CLIENT_ID_SIZE]);

impl ClientId {
    /// Derive the identity: the leading bytes of SHA-256(secret).
    pub fn derive(secret: &SharedSecret) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut id = [0u8; CLIENT_ID_SIZE];
        id.copy_from_slice(&digest[..CLIENT_ID_SIZE]);
        Self(id)
    }

    /// Hex form used as the registry key and the form key.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Raw identity bytes.
    pub fn as_bytes(&self) -> &[u8; CLIENT_ID_SIZE] {
        &self.0
    }
}

/// Symmetric keys derived from the shared secret.
///
/// `data_key` seals transfer units; `sum_key` authenticates the
/// plaintext payload inside them. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ChannelKeys {
    data_key: [u8; KEY_SIZE],
    sum_key: [u8; KEY_SIZE],
}

impl ChannelKeys {
    /// Expand the shared secret into the session keys.
    pub fn derive(secret: &SharedSecret) -> Self {
        let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT), secret.as_bytes());

        let mut data_key = [0u8; KEY_SIZE];
        let mut sum_key = [0u8; KEY_SIZE];

        // Output lengths are valid for SHA-256, expand cannot fail
        hkdf.expand(b"data key", &mut data_key).unwrap();
        hkdf.expand(b"sum key", &mut sum_key).unwrap();

        Self { data_key, sum_key }
    }

    /// The transfer-unit sealing key.
    pub fn data_key(&self) -> AeadKey {
        AeadKey::from_bytes(self.data_key)
    }

    /// Truncated HMAC-SHA256 over a payload, hex-encoded.
    ///
    /// Carried as the `DecryptedSum` field; keying the sum binds it to
    /// the session rather than just the bytes.
    pub fn payload_sum(&self, data: &[u8]) -> String {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.sum_key).expect("HMAC accepts any key size");
        mac.update(data);
        let tag = mac.finalize().into_bytes();
        hex::encode(&tag[..SUM_SIZE])
    }

    /// Constant-time check of a received payload sum.
    pub fn verify_payload_sum(&self, data: &[u8], expected: &str) -> bool {
        let computed = self.payload_sum(data);
        if computed.len() != expected.len() {
            return false;
        }
        computed
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn shared_pair() -> (SharedSecret, SharedSecret) {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let a_pub = a.public();
        let b_pub = b.public();
        (a.agree(&b_pub), b.agree(&a_pub))
    }

    #[test]
    fn test_client_id_is_deterministic() {
        let (ours, theirs) = shared_pair();
        assert_eq!(ClientId::derive(&ours), ClientId::derive(&theirs));
        assert_eq!(ClientId::derive(&ours).to_hex().len(), CLIENT_ID_SIZE * 2);
    }

    #[test]
    fn test_distinct_secrets_distinct_ids() {
        let (a, _) = shared_pair();
        let (b, _) = shared_pair();
        assert_ne!(ClientId::derive(&a), ClientId::derive(&b));
    }

    #[test]
    fn test_keys_match_across_sides() {
        let (ours, theirs) = shared_pair();
        let our_keys = ChannelKeys::derive(&ours);
        let their_keys = ChannelKeys::derive(&theirs);

        assert_eq!(
            our_keys.data_key().as_bytes(),
            their_keys.data_key().as_bytes()
        );
        assert_eq!(
            our_keys.payload_sum(b"payload"),
            their_keys.payload_sum(b"payload")
        );
    }

    #[test]
    fn test_data_and_sum_keys_differ() {
        let (ours, _) = shared_pair();
        let keys = ChannelKeys::derive(&ours);
        assert_ne!(keys.data_key, keys.sum_key);
    }

    #[test]
    fn test_payload_sum_verification() {
        let (ours, _) = shared_pair();
        let keys = ChannelKeys::derive(&ours);

        let sum = keys.payload_sum(b"some bytes");
        assert_eq!(sum.len(), SUM_SIZE * 2);
        assert!(keys.verify_payload_sum(b"some bytes", &sum));
        assert!(!keys.verify_payload_sum(b"other bytes", &sum));
        assert!(!keys.verify_payload_sum(b"some bytes", "deadbeef"));
    }
}
