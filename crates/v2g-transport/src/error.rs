//! Transport layer errors

use std::time::Duration;

use thiserror::Error;

/// Malformed V2GTP header
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Unsupported protocol version 0x{0:02X}")]
    InvalidVersion(u8),

    #[error("Inverse version 0x{inverse:02X} does not match version 0x{version:02X}")]
    InvalidInverseVersion { version: u8, inverse: u8 },

    /// Length with the high bit set
    #[error("Implausible payload length 0x{0:08X}")]
    ImplausibleLength(u32),

    #[error("Payload length {length} exceeds maximum {max}")]
    PayloadTooLarge { length: u64, max: u32 },

    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Connection closed")]
    ConnectionClosed,

    /// No message within the wait time; the connection stays usable
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub(crate) fn from_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<v2g_core::CodecError> for TransportError {
    fn from(err: v2g_core::CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Failure to establish a connection to the SECC
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Cannot resolve host '{host}': {reason}")]
    HostResolution { host: String, reason: String },

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer certificate lacks the expected identity attribute
    #[error("Peer identity mismatch: expected DC={expected}, found {found:?}")]
    IdentityMismatch {
        expected: String,
        found: Vec<String>,
    },

    #[error("TLS configuration error: {0}")]
    Config(String),
}

impl ConnectError {
    /// Failure classes a caller may handle differently from fatal ones
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::IdentityMismatch { .. } | Self::Handshake(_))
    }

    /// Short category name for logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::HostResolution { .. } => "host_resolution",
            Self::Handshake(_) => "handshake",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::Io(_) => "io",
            Self::IdentityMismatch { .. } => "identity_mismatch",
            Self::Config(_) => "config",
        }
    }
}

impl From<rustls::Error> for ConnectError {
    fn from(err: rustls::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_error_classes() {
        assert!(ConnectError::Handshake("bad record".into()).is_expected());
        assert!(ConnectError::IdentityMismatch {
            expected: "CPO".into(),
            found: vec!["OEM".into()],
        }
        .is_expected());
        assert!(!ConnectError::ConnectTimeout(Duration::from_secs(1)).is_expected());
        assert!(!ConnectError::Config("no roots".into()).is_expected());
    }

    #[test]
    fn test_eof_is_connection_closed() {
        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            TransportError::from_io(err),
            TransportError::ConnectionClosed
        ));
    }
}
