//! V2GTP framing
//!
//! Every message travels as an 8-byte header followed by its payload:
//!
//! ```text
//! [version:1][~version:1][payload_type:2][payload_length:4]  (big-endian)
//! ```

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use v2g_core::PayloadType;

use crate::error::{FramingError, TransportError};

pub const HEADER_LEN: usize = 8;
pub const PROTOCOL_VERSION: u8 = 0x01;
pub const INVERSE_PROTOCOL_VERSION: u8 = !PROTOCOL_VERSION;

const LENGTH_SENTINEL_MASK: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub payload_type: PayloadType,
    pub payload_length: u32,
}

impl Header {
    pub fn new(payload_type: PayloadType, payload_length: u32) -> Self {
        Self {
            payload_type,
            payload_length,
        }
    }

    /// Validate and decode a header
    ///
    /// Checks run in wire order: version, inverse version, length sentinel
    /// bit, configured maximum.
    pub fn parse(bytes: &[u8; HEADER_LEN], max_payload_length: u32) -> Result<Self, FramingError> {
        let version = bytes[0];
        let inverse = bytes[1];
        if version != PROTOCOL_VERSION {
            return Err(FramingError::InvalidVersion(version));
        }
        if inverse != !version {
            return Err(FramingError::InvalidInverseVersion { version, inverse });
        }

        let payload_type = u16::from_be_bytes([bytes[2], bytes[3]]);
        let payload_length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if payload_length & LENGTH_SENTINEL_MASK != 0 {
            return Err(FramingError::ImplausibleLength(payload_length));
        }
        if payload_length > max_payload_length {
            return Err(FramingError::PayloadTooLarge {
                length: u64::from(payload_length),
                max: max_payload_length,
            });
        }

        Ok(Self {
            payload_type: payload_type.into(),
            payload_length,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = PROTOCOL_VERSION;
        out[1] = INVERSE_PROTOCOL_VERSION;
        out[2..4].copy_from_slice(&u16::from(self.payload_type).to_be_bytes());
        out[4..8].copy_from_slice(&self.payload_length.to_be_bytes());
        out
    }
}

/// One complete V2GTP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload_type: PayloadType, payload: Vec<u8>) -> Self {
        Self {
            payload_type,
            payload,
        }
    }

    fn header(&self, max_payload_length: u32) -> Result<Header, FramingError> {
        let length = u32::try_from(self.payload.len())
            .ok()
            .filter(|len| *len & LENGTH_SENTINEL_MASK == 0 && *len <= max_payload_length)
            .ok_or(FramingError::PayloadTooLarge {
                length: self.payload.len() as u64,
                max: max_payload_length,
            })?;
        Ok(Header::new(self.payload_type, length))
    }

    /// Header plus payload
    pub fn to_bytes(&self, max_payload_length: u32) -> Result<Vec<u8>, FramingError> {
        let header = self.header(max_payload_length)?;
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decode a frame that arrived whole, e.g. in a UDP datagram
    pub fn from_datagram(bytes: &[u8], max_payload_length: u32) -> Result<Self, FramingError> {
        let header_bytes: &[u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(FramingError::LengthMismatch {
                expected: HEADER_LEN,
                actual: bytes.len(),
            })?;
        let header = Header::parse(header_bytes, max_payload_length)?;
        let expected = HEADER_LEN + header.payload_length as usize;
        if bytes.len() != expected {
            return Err(FramingError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self::new(header.payload_type, bytes[HEADER_LEN..].to_vec()))
    }
}

/// Read exactly one frame from a byte stream
///
/// Waits until the full header and payload are available. EOF at any point
/// yields [`TransportError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R, max_payload_length: u32) -> Result<Frame, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header_bytes = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header_bytes)
        .await
        .map_err(TransportError::from_io)?;
    let header = Header::parse(&header_bytes, max_payload_length)?;

    let mut payload = vec![0u8; header.payload_length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(TransportError::from_io)?;

    Ok(Frame::new(header.payload_type, payload))
}

/// Frame reassembly state kept across reads
///
/// Bytes received so far stay here when a read is cancelled, so a timed
/// out [`FrameBuffer::read_from`] can be retried without losing data.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes received but not yet returned as a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Split one complete frame off the buffer, if there is one
    ///
    /// The header is validated as soon as its 8 bytes are present.
    pub fn decode(&mut self, max_payload_length: u32) -> Result<Option<Frame>, FramingError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header_bytes = [0u8; HEADER_LEN];
        header_bytes.copy_from_slice(&self.buffer[..HEADER_LEN]);
        let header = Header::parse(&header_bytes, max_payload_length)?;

        let total = HEADER_LEN + header.payload_length as usize;
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }
        let mut frame = self.buffer.split_to(total);
        let payload = frame.split_off(HEADER_LEN);
        Ok(Some(Frame::new(header.payload_type, payload.to_vec())))
    }

    /// Read until one frame is complete
    ///
    /// Cancel safe: dropping the future keeps every byte already read.
    pub async fn read_from<R>(
        &mut self,
        reader: &mut R,
        max_payload_length: u32,
    ) -> Result<Frame, TransportError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if let Some(frame) = self.decode(max_payload_length)? {
                return Ok(frame);
            }
            let read = reader
                .read_buf(&mut self.buffer)
                .await
                .map_err(TransportError::from_io)?;
            if read == 0 {
                return Err(TransportError::ConnectionClosed);
            }
        }
    }
}

/// Write one frame and flush
pub async fn write_frame<W>(
    writer: &mut W,
    frame: &Frame,
    max_payload_length: u32,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = frame.to_bytes(max_payload_length)?;
    writer
        .write_all(&bytes)
        .await
        .map_err(TransportError::from_io)?;
    writer.flush().await.map_err(TransportError::from_io)
}
