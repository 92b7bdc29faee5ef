//! Transfer units and the secure channel that seals them.
//!
//! After the key exchange, every POST body and every non-empty
//! response body is one [`TransferUnit`]: a JSON object encrypted into
//! a sealed blob and base64-wrapped by the HTTP layer. The
//! [`SecureChannel`] owns everything derived from the shared secret
//! and enforces the three frame invariants on open: the client-id
//! matches the session identity, the payload sum validates, and the
//! direction matches the leg the frame arrived on.

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::crypto::{Aead, ChannelKeys, ClientId, SharedSecret};
use crate::error::{Error, Result};
use crate::flags::Flags;

/// The payload struct carried inside every post-handshake POST body.
///
/// Field names are the wire contract; both ends of the circuit must
/// agree on them exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferUnit {
    /// Sender's external address, informational, may be empty
    #[serde(rename = "GlobalIP")]
    pub global_ip: String,

    /// Sender's local address, informational, may be empty
    #[serde(rename = "LocalIP")]
    pub local_ip: String,

    /// RFC 3339 timestamp at seal time
    #[serde(rename = "TimeStamp")]
    pub timestamp: String,

    /// Sender's client identity in hex, echoed for cross-checks
    #[serde(rename = "ClientID")]
    pub client_id: String,

    /// Opaque payload, possibly deflated (see `Flags`)
    #[serde(rename = "Data", with = "b64_data")]
    pub data: Vec<u8>,

    /// Keyed integrity sum over `Data` as carried
    #[serde(rename = "DecryptedSum")]
    pub decrypted_sum: String,

    /// Which leg the frame travels (`TO_SERVER` or `TO_CLIENT`)
    #[serde(rename = "Direction", with = "flag_bits")]
    pub direction: Flags,

    /// Per-message bits: `COMPRESS` and the command flags
    #[serde(rename = "Flags", with = "flag_bits")]
    pub flags: Flags,
}

impl TransferUnit {
    /// Recover the caller's payload, inflating iff the sender set the
    /// per-message `COMPRESS` flag.
    pub fn into_payload(self) -> Result<Vec<u8>> {
        if self.flags.contains(Flags::COMPRESS) {
            codec::inflate(&self.data)
        } else {
            Ok(self.data)
        }
    }
}

/// Everything derived from one shared secret: identity, sealing key,
/// sum key.
///
/// Both sides construct this from their copy of the secret and arrive
/// at identical state; the channel is the session from the crypto
/// layer's point of view.
pub struct SecureChannel {
    id: ClientId,
    id_hex: String,
    aead: Aead,
    keys: ChannelKeys,
}

impl SecureChannel {
    /// Derive the channel state from a freshly agreed secret.
    pub fn derive(secret: &SharedSecret) -> Self {
        let id = ClientId::derive(secret);
        let keys = ChannelKeys::derive(secret);
        let aead = Aead::new(keys.data_key());
        Self {
            id,
            id_hex: id.to_hex(),
            aead,
            keys,
        }
    }

    /// The session identity.
    pub fn client_id(&self) -> ClientId {
        self.id
    }

    /// The session identity in hex, as used on the wire.
    pub fn id_hex(&self) -> &str {
        &self.id_hex
    }

    /// Seal a frame for the wire.
    ///
    /// `session_flags` supplies the `COMPRESS` capability; deflate is
    /// applied only when it actually shrinks the payload and the frame
    /// is not a circuit-test frame. `ctrl` carries the per-message
    /// command bits, `direction` the leg.
    pub fn seal(
        &self,
        payload: &[u8],
        direction: Flags,
        ctrl: Flags,
        session_flags: Flags,
    ) -> Result<Vec<u8>> {
        let compress_eligible =
            session_flags.contains(Flags::COMPRESS) && !ctrl.contains(Flags::TEST_CONNECTION);
        let (carried, unit_flags) = match compress_eligible
            .then(|| codec::deflate_if_smaller(payload))
            .flatten()
        {
            Some(compressed) => (compressed, ctrl | Flags::COMPRESS),
            None => (payload.to_vec(), ctrl),
        };

        let unit = TransferUnit {
            global_ip: String::new(),
            local_ip: String::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            client_id: self.id_hex.clone(),
            decrypted_sum: self.keys.payload_sum(&carried),
            data: carried,
            direction,
            flags: unit_flags,
        };

        let encoded = serde_json::to_vec(&unit)
            .map_err(|e| Error::crypto(format!("transfer unit encoding failed: {}", e)))?;
        self.aead.seal(&encoded)
    }

    /// Open a sealed frame received on the given leg.
    ///
    /// Validates the AEAD tag, the embedded client-id, the payload
    /// sum, and the direction, in that order. Any failure surfaces as
    /// an invalid peer response and must terminate the session.
    pub fn open(&self, blob: &[u8], expect_direction: Flags) -> Result<TransferUnit> {
        let plaintext = self.aead.open(blob)?;

        let unit: TransferUnit = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::crypto(format!("malformed transfer unit: {}", e)))?;

        if unit.client_id != self.id_hex {
            return Err(Error::crypto("transfer unit names a foreign client identity"));
        }
        if !self.keys.verify_payload_sum(&unit.data, &unit.decrypted_sum) {
            return Err(Error::crypto("transfer unit integrity sum mismatch"));
        }
        if unit.direction != expect_direction {
            return Err(Error::crypto("transfer unit direction mismatch"));
        }

        Ok(unit)
    }
}

/// Serialize binary payloads as base64 strings inside the JSON unit.
mod b64_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Serialize flag sets as their raw bit value.
mod flag_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::flags::Flags;

    pub fn serialize<S>(flags: &Flags, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(flags.bits())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Flags, D::Error>
    where
        D: Deserializer<'de>,
    {
        u32::deserialize(deserializer).map(Flags::from_bits_truncate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn channel_pair() -> (SecureChannel, SecureChannel) {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let a_pub = a.public();
        let b_pub = b.public();
        let ours = SecureChannel::derive(&a.agree(&b_pub));
        let theirs = SecureChannel::derive(&b.agree(&a_pub));
        (ours, theirs)
    }

    #[test]
    fn test_both_sides_derive_same_identity() {
        let (client, server) = channel_pair();
        assert_eq!(client.id_hex(), server.id_hex());
        assert_eq!(client.client_id(), server.client_id());
    }

    #[test]
    fn test_data_frame_roundtrip() {
        let (client, server) = channel_pair();

        let blob = client
            .seal(b"hello", Flags::TO_SERVER, Flags::empty(), Flags::ENCRYPT)
            .unwrap();
        let unit = server.open(&blob, Flags::TO_SERVER).unwrap();

        assert_eq!(unit.flags, Flags::empty());
        assert_eq!(unit.into_payload().unwrap(), b"hello");
    }

    #[test]
    fn test_compressible_payload_shrinks_frame() {
        let (client, server) = channel_pair();
        let payload = vec![0u8; 64 * 1024];

        let blob = client
            .seal(
                &payload,
                Flags::TO_SERVER,
                Flags::empty(),
                Flags::ENCRYPT | Flags::COMPRESS,
            )
            .unwrap();

        // The sealed frame (and hence the base64 POST body) must be
        // strictly smaller than the raw payload.
        assert!(blob.len() < payload.len());

        let unit = server.open(&blob, Flags::TO_SERVER).unwrap();
        assert!(unit.flags.contains(Flags::COMPRESS));
        assert_eq!(unit.into_payload().unwrap(), payload);
    }

    #[test]
    fn test_high_entropy_payload_ships_raw() {
        let (client, server) = channel_pair();
        let payload: Vec<u8> = (0..1024).map(|_| rand::random::<u8>()).collect();

        let blob = client
            .seal(
                &payload,
                Flags::TO_SERVER,
                Flags::empty(),
                Flags::ENCRYPT | Flags::COMPRESS,
            )
            .unwrap();
        let unit = server.open(&blob, Flags::TO_SERVER).unwrap();

        assert!(!unit.flags.contains(Flags::COMPRESS));
        assert_eq!(unit.into_payload().unwrap(), payload);
    }

    #[test]
    fn test_circuit_test_frames_never_compress() {
        let (client, server) = channel_pair();
        let payload = vec![b'A'; 4096];

        let blob = client
            .seal(
                &payload,
                Flags::TO_SERVER,
                Flags::TEST_CONNECTION,
                Flags::ENCRYPT | Flags::COMPRESS,
            )
            .unwrap();
        let unit = server.open(&blob, Flags::TO_SERVER).unwrap();

        assert!(!unit.flags.contains(Flags::COMPRESS));
        assert!(unit.flags.contains(Flags::TEST_CONNECTION));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let (client, server) = channel_pair();

        let mut blob = client
            .seal(b"payload", Flags::TO_SERVER, Flags::empty(), Flags::ENCRYPT)
            .unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        assert!(matches!(
            server.open(&blob, Flags::TO_SERVER),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_direction_mismatch_rejected() {
        let (client, server) = channel_pair();

        let blob = client
            .seal(b"payload", Flags::TO_SERVER, Flags::empty(), Flags::ENCRYPT)
            .unwrap();

        assert!(matches!(
            server.open(&blob, Flags::TO_CLIENT),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_foreign_client_id_rejected() {
        let (client, server) = channel_pair();

        // Forge a unit under the session key but naming another identity.
        let mut unit = TransferUnit {
            global_ip: String::new(),
            local_ip: String::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            client_id: "00".repeat(16),
            data: b"payload".to_vec(),
            decrypted_sum: String::new(),
            direction: Flags::TO_SERVER,
            flags: Flags::empty(),
        };
        unit.decrypted_sum = client.keys.payload_sum(&unit.data);
        let blob = client.aead.seal(&serde_json::to_vec(&unit).unwrap()).unwrap();

        assert!(matches!(
            server.open(&blob, Flags::TO_SERVER),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_sum_mismatch_rejected() {
        let (client, server) = channel_pair();

        let unit = TransferUnit {
            global_ip: String::new(),
            local_ip: String::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            client_id: client.id_hex().to_string(),
            data: b"payload".to_vec(),
            decrypted_sum: "0011223344556677".to_string(),
            direction: Flags::TO_SERVER,
            flags: Flags::empty(),
        };
        let blob = client.aead.seal(&serde_json::to_vec(&unit).unwrap()).unwrap();

        assert!(matches!(
            server.open(&blob, Flags::TO_SERVER),
            Err(Error::Crypto(_))
        ));
    }
}
