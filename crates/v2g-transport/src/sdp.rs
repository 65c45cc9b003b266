//! SECC Discovery Protocol (SDP) over UDP
//!
//! The EVCC asks for the SECC's TCP endpoint with a 2-byte request; the SECC
//! answers with address, port and the security it offers. Both travel as
//! single V2GTP frames in one datagram.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use v2g_core::{PayloadType, SeccDiscoveryReq, SeccDiscoveryRes, Security, TransportProtocol};

use crate::error::TransportError;
use crate::framing::Frame;

pub const SDP_PORT: u16 = 15118;

/// Largest SDP frame on the wire (response: header + 20 bytes)
const SDP_MAX_PAYLOAD: u32 = SeccDiscoveryRes::LEN as u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpClientConfig {
    /// Where requests are sent, usually the link-local all-nodes group
    #[serde(default = "default_target")]
    pub target: SocketAddr,

    /// Local bind address; derived from the target family when unset
    #[serde(default)]
    pub bind: Option<SocketAddr>,

    #[serde(default = "default_security")]
    pub security: Security,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait for a response after each request (ms)
    #[serde(default = "default_try_timeout_ms")]
    pub try_timeout_ms: u64,
}

fn default_target() -> SocketAddr {
    SocketAddr::new(
        IpAddr::V6(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1)),
        SDP_PORT,
    )
}

fn default_security() -> Security {
    Security::Tls
}

fn default_max_attempts() -> u32 {
    50
}

fn default_try_timeout_ms() -> u64 {
    250
}

impl Default for SdpClientConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            bind: None,
            security: default_security(),
            max_attempts: default_max_attempts(),
            try_timeout_ms: default_try_timeout_ms(),
        }
    }
}

fn io_error(e: std::io::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

/// Parse an SDP datagram of the given payload type, `None` if it is not one
fn parse_datagram(bytes: &[u8], expected: PayloadType) -> Option<Vec<u8>> {
    match Frame::from_datagram(bytes, SDP_MAX_PAYLOAD) {
        Ok(frame) if frame.payload_type == expected => Some(frame.payload),
        Ok(frame) => {
            debug!(payload_type = ?frame.payload_type, "Ignoring unexpected SDP payload type");
            None
        }
        Err(e) => {
            debug!(error = %e, "Ignoring malformed SDP datagram");
            None
        }
    }
}

/// Ask for the SECC endpoint, retrying until a valid response arrives
pub async fn discover_secc(config: &SdpClientConfig) -> Result<SeccDiscoveryRes, TransportError> {
    let bind = config.bind.unwrap_or_else(|| match config.target {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    });
    let socket = UdpSocket::bind(bind).await.map_err(io_error)?;

    let request = SeccDiscoveryReq {
        security: config.security,
        transport_protocol: TransportProtocol::Tcp,
    };
    let datagram = Frame::new(PayloadType::SdpRequest, request.to_bytes().to_vec())
        .to_bytes(SDP_MAX_PAYLOAD)?;
    let try_timeout = Duration::from_millis(config.try_timeout_ms);
    let mut buf = [0u8; 64];

    for attempt in 1..=config.max_attempts {
        socket
            .send_to(&datagram, config.target)
            .await
            .map_err(io_error)?;
        debug!(attempt, target = %config.target, "Sent SECC discovery request");

        let deadline = tokio::time::Instant::now() + try_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let (len, from) = match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(received) => received.map_err(io_error)?,
                Err(_) => break,
            };
            let Some(payload) = parse_datagram(&buf[..len], PayloadType::SdpResponse) else {
                continue;
            };
            match SeccDiscoveryRes::from_bytes(&payload) {
                Ok(response) => {
                    info!(%from, address = %response.address, port = response.port,
                        security = ?response.security, "SECC discovered");
                    return Ok(response);
                }
                Err(e) => debug!(%from, error = %e, "Ignoring invalid SDP response"),
            }
        }
    }

    warn!(attempts = config.max_attempts, "SECC discovery failed");
    Err(TransportError::Timeout(format!(
        "no SECC discovery response after {} requests",
        config.max_attempts
    )))
}

/// Answers SDP requests with the SECC's TCP endpoint
pub struct SdpServer {
    socket: UdpSocket,
    advertised: SocketAddr,
    security: Security,
}

impl SdpServer {
    /// Bind to `addr` and advertise `advertised` with `security`
    pub async fn bind(
        addr: SocketAddr,
        advertised: SocketAddr,
        security: Security,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await.map_err(io_error)?;
        Ok(Self {
            socket,
            advertised,
            security,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(io_error)
    }

    /// Response for one request; the SECC offers only what it runs
    pub fn response_for(&self, request: &SeccDiscoveryReq) -> SeccDiscoveryRes {
        if request.security != self.security {
            debug!(requested = ?request.security, offered = ?self.security,
                "EVCC requested a different security mode");
        }
        SeccDiscoveryRes {
            address: self.advertised.ip(),
            port: self.advertised.port(),
            security: self.security,
            transport_protocol: TransportProtocol::Tcp,
        }
    }

    /// Serve requests until `shutdown` turns true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        info!(addr = ?self.socket.local_addr().ok(), advertised = %self.advertised, "SDP server listening");
        let mut buf = [0u8; 64];
        loop {
            let (len, from) = tokio::select! {
                received = self.socket.recv_from(&mut buf) => received.map_err(io_error)?,
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("SDP server stopped");
                    return Ok(());
                }
            };
            let Some(payload) = parse_datagram(&buf[..len], PayloadType::SdpRequest) else {
                continue;
            };
            let request = match SeccDiscoveryReq::from_bytes(&payload) {
                Ok(request) => request,
                Err(e) => {
                    debug!(%from, error = %e, "Ignoring invalid SDP request");
                    continue;
                }
            };
            let response = self.response_for(&request);
            let datagram = Frame::new(PayloadType::SdpResponse, response.to_bytes().to_vec())
                .to_bytes(SDP_MAX_PAYLOAD)?;
            self.socket
                .send_to(&datagram, from)
                .await
                .map_err(io_error)?;
            debug!(%from, "Answered SECC discovery request");
        }
    }
}
