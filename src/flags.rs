//! Channel flag bits.
//!
//! One flag space serves three roles: capability bits passed to
//! [`ChannelClient::build`](crate::ChannelClient::build) and
//! [`GateService::create`](crate::GateService::create), direction bits
//! stamped on every transfer unit, and per-message command bits.
//! Values are disjoint and stable; they appear inside encrypted frames.

use bitflags::bitflags;

bitflags! {
    /// Session, direction, and per-message command flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        /// Verbose per-session diagnostics
        const DEBUG = 1 << 0;
        /// End-to-end encryption (mandatory; build refuses without it)
        const ENCRYPT = 1 << 1;
        /// Deflate payloads when the compressed form is strictly smaller
        const COMPRESS = 1 << 2;
        /// Run the circuit self-test after the key exchange
        const TEST_CIRCUIT = 1 << 3;
        /// Probe server reachability before connecting
        const PING_SERVER = 1 << 4;
        /// Frame travels client to server
        const TO_SERVER = 1 << 5;
        /// Frame travels server to client
        const TO_CLIENT = 1 << 6;
        /// Circuit self-test frame
        const TEST_CONNECTION = 1 << 7;
        /// Empty poll frame riding a possible server-to-client payload back
        const CHECK_STREAM = 1 << 8;
        /// Tear the session down
        const TERMINATE = 1 << 9;
        /// Reserved; rejected at build time
        const DO_NOT_USE = 1 << 31;
    }
}

impl Flags {
    /// Command bits that may stand in for payload data.
    pub const COMMANDS: Flags = Flags::TEST_CONNECTION
        .union(Flags::CHECK_STREAM)
        .union(Flags::TERMINATE);

    /// Whether any command bit is set.
    pub fn is_command(self) -> bool {
        self.intersects(Flags::COMMANDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_disjoint() {
        let all = [
            Flags::DEBUG,
            Flags::ENCRYPT,
            Flags::COMPRESS,
            Flags::TEST_CIRCUIT,
            Flags::PING_SERVER,
            Flags::TO_SERVER,
            Flags::TO_CLIENT,
            Flags::TEST_CONNECTION,
            Flags::CHECK_STREAM,
            Flags::TERMINATE,
            Flags::DO_NOT_USE,
        ];
        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                if i != j {
                    assert!((*a & *b).is_empty(), "{:?} overlaps {:?}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_command_classification() {
        assert!(Flags::CHECK_STREAM.is_command());
        assert!(Flags::TERMINATE.is_command());
        assert!(!(Flags::ENCRYPT | Flags::COMPRESS).is_command());
    }

    #[test]
    fn test_bits_roundtrip() {
        let f = Flags::ENCRYPT | Flags::COMPRESS | Flags::TO_SERVER;
        assert_eq!(Flags::from_bits_truncate(f.bits()), f);
    }
}
