//! Payload codecs: base64 wrapping, optional deflate, command strings.
//!
//! Base64 is the outer armor on every form key, form value, and
//! response body. Deflate is applied per payload, and only when the
//! compressed form is strictly smaller than the raw form — a
//! high-entropy payload ships uncompressed rather than inflated.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::config::CoverProfile;
use crate::error::{Error, Result};
use crate::flags::Flags;

/// Fixed payload carried by an otherwise-empty poll frame.
pub const CMD_CHECK_STREAM: &str = "CheckStreamData";

/// Fixed payload carried by a terminate frame.
pub const CMD_TERMINATE: &str = "TerminateConnection";

/// Base64-encode a byte slice with the standard alphabet.
pub fn b64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Base64-decode a string with the standard alphabet.
pub fn b64_decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| Error::transport(format!("malformed base64 body: {}", e)))
}

/// Deflate `data`, returning the compressed form only when it is
/// strictly smaller than the input.
pub fn deflate_if_smaller(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    let compressed = encoder.finish().ok()?;
    if compressed.len() < data.len() {
        Some(compressed)
    } else {
        None
    }
}

/// Inflate a deflate stream produced by [`deflate_if_smaller`].
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::crypto(format!("payload decompression failed: {}", e)))?;
    Ok(out)
}

/// Payload substituted for a control frame that carries no caller data.
///
/// The test-connection payload is the profile's configured literal; the
/// remaining commands map to fixed printable strings.
pub fn command_payload(flags: Flags, profile: &CoverProfile) -> Option<Vec<u8>> {
    if flags.contains(Flags::TEST_CONNECTION) {
        Some(profile.test_stream.clone().into_bytes())
    } else if flags.contains(Flags::CHECK_STREAM) {
        Some(CMD_CHECK_STREAM.as_bytes().to_vec())
    } else if flags.contains(Flags::TERMINATE) {
        Some(CMD_TERMINATE.as_bytes().to_vec())
    } else {
        None
    }
}

/// Whether every byte is printable ASCII (space through tilde).
pub fn is_ascii_printable(data: &[u8]) -> bool {
    data.iter().all(|&b| (0x20..=0x7e).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64_roundtrip() {
        let data = b"covert payload \x00\xff\x7f";
        let encoded = b64_encode(data);
        assert_eq!(b64_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_b64_rejects_garbage() {
        assert!(b64_decode("!!! not base64 !!!").is_err());
    }

    #[test]
    fn test_deflate_compressible() {
        let data = vec![0u8; 64 * 1024];
        let compressed = deflate_if_smaller(&data).expect("zeros must compress");
        assert!(compressed.len() < data.len());
        assert_eq!(inflate(&compressed).unwrap(), data);
    }

    #[test]
    fn test_deflate_rejects_inflation() {
        // High-entropy input: deflate output would grow, so the raw
        // form must be kept.
        let data: Vec<u8> = (0..1024).map(|_| rand::random::<u8>()).collect();
        assert!(deflate_if_smaller(&data).is_none());
    }

    #[test]
    fn test_command_payloads() {
        let profile = CoverProfile::default();
        assert_eq!(
            command_payload(Flags::TEST_CONNECTION, &profile).unwrap(),
            profile.test_stream.as_bytes()
        );
        assert_eq!(
            command_payload(Flags::CHECK_STREAM, &profile).unwrap(),
            CMD_CHECK_STREAM.as_bytes()
        );
        assert_eq!(
            command_payload(Flags::TERMINATE, &profile).unwrap(),
            CMD_TERMINATE.as_bytes()
        );
        assert!(command_payload(Flags::empty(), &profile).is_none());
    }

    #[test]
    fn test_ascii_printable() {
        assert!(is_ascii_printable(b"Hello, gate!"));
        assert!(!is_ascii_printable(b"null\x00byte"));
        assert!(!is_ascii_printable(&[0x80, 0x81]));
    }
}
