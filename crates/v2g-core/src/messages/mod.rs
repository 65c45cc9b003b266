//! V2G message model
//!
//! The schema layer (EXI/XML) is external; the session engine only routes on
//! [`MessageKind`] and reads a handful of typed fields from each body.

mod body;
mod kind;
mod types;

pub use body::*;
pub use kind::MessageKind;
pub use types::*;

use std::fmt;

use serde::{Deserialize, Serialize};

/// 8-byte session identifier assigned by the SECC during session setup
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 8]);

impl SessionId {
    /// The all-zero id the EVCC uses before a session exists
    pub const NONE: SessionId = SessionId([0; 8]);

    /// Generate a fresh random, non-zero session id
    pub fn generate() -> Self {
        loop {
            let id = SessionId(rand::random());
            if !id.is_none() {
                return id;
            }
        }
    }

    pub fn is_none(&self) -> bool {
        self.0 == [0; 8]
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self)
    }
}

/// Wire payload type carried in the V2GTP header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// EXI-encoded V2G message (0x8001)
    ExiMessage,
    /// SECC discovery protocol request (0x9000)
    SdpRequest,
    /// SECC discovery protocol response (0x9001)
    SdpResponse,
    /// Any other (reserved or manufacturer specific) value
    Other(u16),
}

impl From<u16> for PayloadType {
    fn from(value: u16) -> Self {
        match value {
            0x8001 => Self::ExiMessage,
            0x9000 => Self::SdpRequest,
            0x9001 => Self::SdpResponse,
            other => Self::Other(other),
        }
    }
}

impl From<PayloadType> for u16 {
    fn from(value: PayloadType) -> Self {
        match value {
            PayloadType::ExiMessage => 0x8001,
            PayloadType::SdpRequest => 0x9000,
            PayloadType::SdpResponse => 0x9001,
            PayloadType::Other(other) => other,
        }
    }
}

/// A complete protocol message: session header plus typed body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: SessionId,
    pub body: Body,
}

impl Message {
    pub fn new(session_id: SessionId, body: impl Into<Body>) -> Self {
        Self {
            session_id,
            body: body.into(),
        }
    }

    /// Message outside of any session (app protocol handshake, discovery)
    pub fn sessionless(body: impl Into<Body>) -> Self {
        Self::new(SessionId::NONE, body)
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Typed body if this message is a `T`
    pub fn payload<T: Payload>(&self) -> Option<&T> {
        T::from_body(&self.body)
    }

    /// Response code of a V2G response body, if it carries one
    pub fn response_code(&self) -> Option<ResponseCode> {
        self.body.response_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let id = SessionId([0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF]);
        assert_eq!(id.to_string(), "0123456789ABCDEF");
        assert!(!id.is_none());
        assert!(SessionId::NONE.is_none());
    }

    #[test]
    fn test_generated_session_id_is_not_none() {
        for _ in 0..16 {
            assert!(!SessionId::generate().is_none());
        }
    }

    #[test]
    fn test_payload_type_conversion() {
        assert_eq!(PayloadType::from(0x8001), PayloadType::ExiMessage);
        assert_eq!(PayloadType::from(0x9001), PayloadType::SdpResponse);
        assert_eq!(PayloadType::from(0x1234), PayloadType::Other(0x1234));
        assert_eq!(u16::from(PayloadType::SdpRequest), 0x9000);
    }
}
