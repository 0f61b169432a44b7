//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or naming protocol objects.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A remote object name did not match any known layout.
    #[error("invalid remote object name: {0}")]
    InvalidRemoteName(String),

    /// A vector clock string could not be parsed.
    #[error("invalid vector clock: {0}")]
    InvalidVectorClock(String),

    /// Underlying reader or writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Creates a codec error from any displayable cause.
    pub fn codec(cause: impl std::fmt::Display) -> Self {
        Self::Codec(cause.to_string())
    }
}
