//! Conversion between [`Message`] and V2GTP payloads
//!
//! The production schema layer (EXI) plugs in through [`MessageCodec`].
//! [`JsonCodec`] carries V2G messages as JSON so both roles can run against
//! each other without it.

use crate::error::{CodecError, CodecResult};
use crate::messages::{Body, Message, PayloadType, SeccDiscoveryReq, SeccDiscoveryRes};

/// Encoded message ready for framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub payload_type: PayloadType,
    pub bytes: Vec<u8>,
}

/// Schema layer seam
pub trait MessageCodec: Send + Sync {
    fn encode(&self, message: &Message) -> CodecResult<EncodedPayload>;

    fn decode(&self, payload_type: PayloadType, payload: &[u8]) -> CodecResult<Message>;
}

/// JSON development codec
///
/// SECC discovery messages keep their binary SDP layout, everything else is
/// serde_json under payload type 0x8001.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &Message) -> CodecResult<EncodedPayload> {
        let is_sdp = matches!(
            message.body,
            Body::SeccDiscoveryReq(_) | Body::SeccDiscoveryRes(_)
        );
        if is_sdp && !message.session_id.is_none() {
            return Err(CodecError::Unencodable {
                kind: message.kind().to_string(),
                reason: format!("SDP payloads carry no session id (got {})", message.session_id),
            });
        }

        let encoded = match &message.body {
            Body::SeccDiscoveryReq(req) => EncodedPayload {
                payload_type: PayloadType::SdpRequest,
                bytes: req.to_bytes().to_vec(),
            },
            Body::SeccDiscoveryRes(res) => EncodedPayload {
                payload_type: PayloadType::SdpResponse,
                bytes: res.to_bytes().to_vec(),
            },
            _ => EncodedPayload {
                payload_type: PayloadType::ExiMessage,
                bytes: serde_json::to_vec(message)?,
            },
        };
        Ok(encoded)
    }

    fn decode(&self, payload_type: PayloadType, payload: &[u8]) -> CodecResult<Message> {
        match payload_type {
            PayloadType::ExiMessage => {
                let message: Message = serde_json::from_slice(payload)?;
                Ok(message)
            }
            PayloadType::SdpRequest => Ok(Message::sessionless(SeccDiscoveryReq::from_bytes(
                payload,
            )?)),
            PayloadType::SdpResponse => Ok(Message::sessionless(SeccDiscoveryRes::from_bytes(
                payload,
            )?)),
            PayloadType::Other(other) => Err(CodecError::UnsupportedPayloadType(other)),
        }
    }
}
