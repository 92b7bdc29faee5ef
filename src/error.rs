//! Error types for the gatepost channel.

use thiserror::Error;

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or driving a circuit.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid flags, profile, or scheme at channel construction
    #[error("configuration error: {0}")]
    Config(String),

    /// The gate URI could not be parsed or resolved
    #[error("invalid gate URI: {0}")]
    InvalidUri(String),

    /// Reachability probe failed (no TCP response and/or no HTTP response)
    #[error("gate server is down or unreachable")]
    ServerDown,

    /// Public-key exchange failed
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Circuit self-test returned a corrupt or mismatched stream
    #[error("circuit test failed: {0}")]
    CircuitTest(String),

    /// HTTP-level failure: connection refused, non-200 status, malformed body
    #[error("transport error: {0}")]
    Transport(String),

    /// Decrypt failure, integrity-sum mismatch, or mismatched client-id
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Operation requires an established circuit
    #[error("channel not connected")]
    NotConnected,

    /// Underlying socket I/O error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new handshake error
    pub fn handshake(msg: impl Into<String>) -> Self {
        Error::Handshake(msg.into())
    }

    /// Create a new circuit-test error
    pub fn circuit_test(msg: impl Into<String>) -> Self {
        Error::CircuitTest(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Create a new cryptographic error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Whether the polling worker may retry after this error.
    ///
    /// Transport and socket failures are transient; everything else
    /// (bad crypto, protocol violations, configuration) is terminal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Network(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
