//! Common error types for the message model and collaborators

use thiserror::Error;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while turning messages into payloads and back
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload type this codec cannot decode
    #[error("Unsupported payload type: 0x{0:04X}")]
    UnsupportedPayloadType(u16),

    /// Payload bytes do not describe a valid message
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Message cannot be carried by this payload type
    #[error("Cannot encode {kind}: {reason}")]
    Unencodable { kind: String, reason: String },

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a trust store or the key it hands out
#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// Keystore could not be read
    #[error("Keystore I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No key stored under the alias
    #[error("No private key for alias '{0}'")]
    KeyNotFound(String),

    /// Key material could not be parsed or is of an unsupported type
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// Signing operation failed
    #[error("Signing failed: {0}")]
    Signing(String),
}
