//! v2g-transport - Transport layer for V2G charging sessions
//!
//! This crate moves [`v2g_core::Message`]s between the EVCC and the SECC:
//! - V2GTP framing (8-byte header plus payload) over any byte stream
//! - [`Connection`], one plain or TLS socket with idempotent stop
//! - TLS client with pinned cipher suite and peer identity verification
//! - TLS server configuration for the SECC
//! - SECC discovery protocol (SDP) over UDP
//! - In-memory [`MockTransport`] for testing
//!
//! # Example
//!
//! ```ignore
//! use v2g_transport::{TlsClient, TlsClientConfig, MessageTransport};
//!
//! let client = TlsClient::new(&TlsClientConfig::default())?;
//! let mut connection = client.connect("192.168.1.10", 64109, codec).await?;
//! let reply = connection.receive(Duration::from_secs(2)).await?;
//! ```

pub mod connection;
pub mod error;
pub mod framing;
pub mod mock;
pub mod sdp;
pub mod tls;

pub use connection::{
    connect_plain, Connection, ConnectionListener, MessageTransport, StopHandle,
    DEFAULT_MAX_PAYLOAD_LENGTH,
};
pub use error::{ConnectError, FramingError, TransportError};
pub use framing::{Frame, FrameBuffer, Header, HEADER_LEN, PROTOCOL_VERSION};
pub use mock::{MockLog, MockTransport};
pub use sdp::{discover_secc, SdpClientConfig, SdpServer};
pub use tls::{
    PemTrustStore, TlsAcceptor, TlsClient, TlsClientConfig, TlsServerConfig,
    DOMAIN_COMPONENT_OID_ARCS,
};
