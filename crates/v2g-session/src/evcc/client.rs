//! EVCC entry point: discover, connect, run one session

use std::sync::Arc;

use tracing::{info, warn};
use v2g_core::{EvController, MessageCodec, Security, TimingPolicy, TrustStore};
use v2g_transport::{connect_plain, discover_secc, Connection, MessageTransport, TlsClient};

use super::EvccSession;
use crate::config::EvccConfig;
use crate::context::EvccSettings;
use crate::error::SessionError;
use crate::SessionOutcome;

/// Connects to a SECC and drives one charging session
pub struct EvccClient {
    config: EvccConfig,
    controller: Arc<dyn EvController>,
    codec: Arc<dyn MessageCodec>,
    settings: Arc<EvccSettings>,
    timing: Arc<TimingPolicy>,
    tls: Option<TlsClient>,
}

impl EvccClient {
    /// Build the client; loads the TLS roots when `config.tls` is set
    pub fn new(
        config: EvccConfig,
        controller: Arc<dyn EvController>,
        codec: Arc<dyn MessageCodec>,
        trust_store: Option<Arc<dyn TrustStore>>,
    ) -> Result<Self, SessionError> {
        let tls = if config.tls {
            Some(TlsClient::new(&config.tls_client)?)
        } else {
            None
        };
        Ok(Self {
            settings: Arc::new(EvccSettings::from_config(&config, trust_store)),
            timing: Arc::new(config.timing.clone()),
            config,
            controller,
            codec,
            tls,
        })
    }

    /// Use an already built TLS client instead of the configured roots
    pub fn with_tls_client(mut self, client: TlsClient) -> Self {
        self.tls = Some(client);
        self
    }

    /// SECC endpoint and whether to use TLS towards it
    async fn resolve_endpoint(&self) -> Result<(String, u16, bool), SessionError> {
        if !self.config.use_sdp {
            return Ok((self.config.host.clone(), self.config.port, self.tls.is_some()));
        }

        let mut sdp = self.config.sdp.clone();
        sdp.security = if self.tls.is_some() {
            Security::Tls
        } else {
            Security::NoTls
        };
        let response = discover_secc(&sdp).await?;
        info!(
            address = %response.address,
            port = response.port,
            security = ?response.security,
            "SECC discovered"
        );

        match (response.security, self.tls.is_some()) {
            (Security::Tls, false) => Err(SessionError::Config(
                "SECC only offers TLS but no TLS client is configured".to_string(),
            )),
            (Security::NoTls, true) => Err(SessionError::Config(
                "SECC does not offer TLS".to_string(),
            )),
            (security, _) => Ok((
                response.address.to_string(),
                response.port,
                security == Security::Tls,
            )),
        }
    }

    async fn connect(&self) -> Result<Connection, SessionError> {
        let (host, port, use_tls) = self.resolve_endpoint().await?;
        let connection = match (&self.tls, use_tls) {
            (Some(tls), true) => tls.connect(&host, port, self.codec.clone()).await?,
            _ => connect_plain(
                &host,
                port,
                self.timing.communication_setup_timeout(),
                self.codec.clone(),
            )
            .await?
            .with_max_payload_length(self.config.tls_client.max_payload_length),
        };
        Ok(connection)
    }

    /// Connect and run a single session to completion
    pub async fn run(&self) -> Result<SessionOutcome, SessionError> {
        let connection = self.connect().await?;
        if !connection.is_tls() {
            warn!("Running the session without TLS");
        }
        let session = EvccSession::new(
            connection,
            self.controller.clone(),
            self.settings.clone(),
            self.timing.clone(),
        );
        Ok(session.run().await)
    }
}
