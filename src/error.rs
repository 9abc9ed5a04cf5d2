//! Error handling module
//!
//! Defines custom error types for the Frontline server.

use std::io;

use thiserror::Error;

/// Main error type for the Frontline server
#[derive(Error, Debug)]
pub enum FrontlineError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session cryptography errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Canned payload lookup errors
    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Too many connections ({0} open)")]
    TooManyConnections(usize),
}

/// Protocol-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid mux command: {0}")]
    InvalidMuxCommand(u8),

    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Unexpected end of payload: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Varint exceeds 64 bits")]
    VarintOverflow,

    #[error("Value {value} out of range for {field}")]
    ValueOutOfRange { field: &'static str, value: u64 },

    #[error("Invalid string encoding")]
    InvalidStringEncoding,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

/// Session token decryption errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("No IV configured for this session")]
    MissingIv,

    #[error("Session token decryption failed")]
    DecryptionFailed,

    #[error("Session token encryption failed")]
    EncryptionFailed,

    #[error("Invalid session key: {0}")]
    InvalidKey(String),
}

/// Canned payload repository errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(&'static str),
}

/// Result type alias for Frontline operations
pub type Result<T> = std::result::Result<T, FrontlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = ProtocolError::InvalidMuxCommand(42);
        assert_eq!(err.to_string(), "Invalid mux command: 42");

        let err = ProtocolError::UnexpectedEof {
            needed: 4,
            remaining: 1,
        };
        assert_eq!(
            err.to_string(),
            "Unexpected end of payload: needed 4 bytes, 1 remaining"
        );

        let err = CryptoError::InvalidIvLength {
            expected: 12,
            actual: 16,
        };
        assert_eq!(err.to_string(), "Invalid IV length: expected 12, got 16");
    }

    #[test]
    fn test_error_conversion() {
        let err: FrontlineError = BlobError::NotFound("session-encryption-changed").into();
        assert!(matches!(err, FrontlineError::Blob(_)));
        assert_eq!(
            err.to_string(),
            "Blob error: Blob not found: session-encryption-changed"
        );

        let err: FrontlineError = CryptoError::MissingIv.into();
        assert!(matches!(err, FrontlineError::Crypto(CryptoError::MissingIv)));
    }
}
