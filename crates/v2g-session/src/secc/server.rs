//! SECC accept loop
//!
//! Binds the TCP listener (optionally wrapped in TLS) and the SDP responder,
//! then runs one [`SeccSession`] task per accepted connection until
//! shutdown is signalled.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use v2g_core::{EvseController, MessageCodec, TimingPolicy};
use v2g_transport::{Connection, ConnectionListener, SdpServer, TlsAcceptor};

use super::SeccSession;
use crate::config::SeccConfig;
use crate::context::SeccSettings;
use crate::error::SessionError;

/// Logs the loss of an accepted connection with its peer
struct PeerLossLog {
    peer: SocketAddr,
}

impl ConnectionListener for PeerLossLog {
    fn connection_lost(&self, reason: &str) {
        warn!(peer = %self.peer, %reason, "EVCC connection lost");
    }
}

/// Charging station endpoint
pub struct SeccServer {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    sdp: Option<SdpServer>,
    controller: Arc<dyn EvseController>,
    codec: Arc<dyn MessageCodec>,
    settings: Arc<SeccSettings>,
    timing: Arc<TimingPolicy>,
    max_payload_length: u32,
}

impl SeccServer {
    /// Bind the listener, load TLS material and bind SDP when enabled
    pub async fn bind(
        config: SeccConfig,
        controller: Arc<dyn EvseController>,
        codec: Arc<dyn MessageCodec>,
    ) -> Result<Self, SessionError> {
        let acceptor = config.tls.as_ref().map(|tls| tls.acceptor()).transpose()?;
        let listener = TcpListener::bind(config.listen).await?;
        let bound = listener.local_addr()?;
        let advertised = config.advertised_endpoint(bound);
        let settings = SeccSettings::from_config(&config, Some(advertised));

        let sdp = if config.sdp_enabled {
            Some(SdpServer::bind(config.sdp_listen, advertised, settings.security).await?)
        } else {
            None
        };

        info!(
            addr = %bound,
            tls = acceptor.is_some(),
            sdp = sdp.is_some(),
            "SECC listening"
        );
        Ok(Self {
            listener,
            acceptor,
            sdp,
            controller,
            codec,
            settings: Arc::new(settings),
            timing: Arc::new(config.timing.clone()),
            max_payload_length: config.max_payload_length,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.listener.local_addr()?)
    }

    /// SDP endpoint, when discovery is enabled
    pub fn sdp_addr(&self) -> Option<SocketAddr> {
        self.sdp.as_ref().and_then(|sdp| sdp.local_addr().ok())
    }

    /// Accept connections until `shutdown` turns true, then stop every session
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SessionError> {
        if let Some(sdp) = self.sdp.take() {
            let sdp_shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = sdp.run(sdp_shutdown).await {
                    error!(error = %e, "SDP server failed");
                }
            });
        }

        let mut sessions = JoinSet::new();
        let session_shutdown = shutdown.clone();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        info!(%peer, "EVCC connected");
                        sessions.spawn(serve_connection(
                            stream,
                            peer,
                            self.acceptor.clone(),
                            self.session_parts(),
                            session_shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "SECC session task failed");
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        info!(active = sessions.len(), "SECC shutting down");
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "SECC session task failed");
            }
        }
        Ok(())
    }

    fn session_parts(&self) -> SessionParts {
        SessionParts {
            controller: self.controller.clone(),
            codec: self.codec.clone(),
            settings: self.settings.clone(),
            timing: self.timing.clone(),
            max_payload_length: self.max_payload_length,
        }
    }
}

struct SessionParts {
    controller: Arc<dyn EvseController>,
    codec: Arc<dyn MessageCodec>,
    settings: Arc<SeccSettings>,
    timing: Arc<TimingPolicy>,
    max_payload_length: u32,
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    parts: SessionParts,
    mut shutdown: watch::Receiver<bool>,
) {
    let connection = match acceptor {
        Some(acceptor) => {
            let handshake = parts.timing.communication_setup_timeout();
            match tokio::time::timeout(handshake, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => Connection::new(tls, true, Some(peer), parts.codec),
                Ok(Err(e)) => {
                    warn!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    warn!(%peer, "TLS handshake timed out");
                    return;
                }
            }
        }
        None => Connection::new(stream, false, Some(peer), parts.codec),
    }
    .with_max_payload_length(parts.max_payload_length);
    connection.set_listener(Arc::new(PeerLossLog { peer }));

    let stop = connection.stop_handle();
    let watcher = tokio::spawn(async move {
        let signalled = shutdown.wait_for(|stopped| *stopped).await.is_ok();
        if signalled {
            stop.stop();
        }
    });

    let outcome = SeccSession::new(connection, parts.controller, parts.settings, parts.timing)
        .run()
        .await;
    watcher.abort();
    info!(%peer, reason = %outcome.reason, graceful = outcome.graceful, "EVCC disconnected");
}
