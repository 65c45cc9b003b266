//! EVCC side TLS client

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info, warn};
use v2g_core::MessageCodec;
use x509_parser::prelude::*;

use super::pem::load_root_store;
use super::pinned_provider;
use super::verifier::ChainOnlyVerifier;
use crate::connection::{open_tcp, Connection, DEFAULT_MAX_PAYLOAD_LENGTH};
use crate::error::ConnectError;

/// Object identifier of the `domainComponent` (DC) attribute
pub const DOMAIN_COMPONENT_OID: &str = "0.9.2342.19200300.100.1.25";

/// Arcs of [`DOMAIN_COMPONENT_OID`]
pub const DOMAIN_COMPONENT_OID_ARCS: [u64; 7] = [0, 9, 2342, 19200300, 100, 1, 25];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsClientConfig {
    /// PEM files with the V2G root certificates
    #[serde(default)]
    pub root_certs: Vec<PathBuf>,

    /// DC value the SECC leaf certificate must carry
    #[serde(default = "default_expected_identity")]
    pub expected_identity: String,

    /// Connect and handshake budget (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_payload_length")]
    pub max_payload_length: u32,
}

fn default_expected_identity() -> String {
    "CPO".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

fn default_max_payload_length() -> u32 {
    DEFAULT_MAX_PAYLOAD_LENGTH
}

impl Default for TlsClientConfig {
    fn default() -> Self {
        Self {
            root_certs: Vec::new(),
            expected_identity: default_expected_identity(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_payload_length: default_max_payload_length(),
        }
    }
}

/// TLS client shared by every EVCC connection attempt
///
/// Cheap to clone; the rustls configuration is built once.
#[derive(Clone)]
pub struct TlsClient {
    config: Arc<ClientConfig>,
    expected_identity: String,
    connect_timeout: Duration,
    max_payload_length: u32,
}

impl TlsClient {
    /// Load the configured roots and build the client
    pub fn new(config: &TlsClientConfig) -> Result<Self, ConnectError> {
        let roots = load_root_store(&config.root_certs)?;
        Ok(Self::with_roots(roots, config.expected_identity.clone())?
            .with_connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .with_max_payload_length(config.max_payload_length))
    }

    pub fn with_roots(
        roots: RootCertStore,
        expected_identity: impl Into<String>,
    ) -> Result<Self, ConnectError> {
        if roots.is_empty() {
            return Err(ConnectError::Config("no V2G root certificates".to_string()));
        }
        let provider = pinned_provider();
        let verifier = ChainOnlyVerifier::new(
            Arc::new(roots),
            provider.signature_verification_algorithms,
        );
        let config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS12])?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            expected_identity: expected_identity.into(),
            connect_timeout: Duration::from_millis(default_connect_timeout_ms()),
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_payload_length(mut self, max_payload_length: u32) -> Self {
        self.max_payload_length = max_payload_length;
        self
    }

    pub fn expected_identity(&self) -> &str {
        &self.expected_identity
    }

    /// Establish a verified TLS connection to the SECC
    ///
    /// The session must never run on an unverified peer: if the leaf
    /// certificate lacks the expected DC the TLS session is shut down and
    /// [`ConnectError::IdentityMismatch`] is returned.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        codec: Arc<dyn MessageCodec>,
    ) -> Result<Connection, ConnectError> {
        match self.establish(host, port).await {
            Ok((stream, addr)) => {
                info!(%addr, identity = %self.expected_identity, "TLS connection established");
                Ok(Connection::new(stream, true, Some(addr), codec)
                    .with_max_payload_length(self.max_payload_length))
            }
            Err(e) => {
                if e.is_expected() {
                    warn!(category = e.category(), error = %e, host, port, "TLS connection failed");
                } else {
                    error!(category = e.category(), error = %e, host, port, "TLS connection failed");
                }
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        host: &str,
        port: u16,
    ) -> Result<(TlsStream<TcpStream>, std::net::SocketAddr), ConnectError> {
        let (tcp, addr) = open_tcp(host, port, self.connect_timeout).await?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ConnectError::Config(format!("invalid server name '{}': {}", host, e)))?;

        let connector = TlsConnector::from(self.config.clone());
        let mut stream = tokio::time::timeout(self.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| ConnectError::ConnectTimeout(self.connect_timeout))?
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        let identities = {
            let (_, session) = stream.get_ref();
            let leaf = session
                .peer_certificates()
                .and_then(|certs| certs.first())
                .ok_or_else(|| ConnectError::Handshake("peer sent no certificate".to_string()))?;
            peer_identities(leaf)?
        };

        if !identities.iter().any(|dc| *dc == self.expected_identity) {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Error while closing unverified TLS session (ignored)");
            }
            return Err(ConnectError::IdentityMismatch {
                expected: self.expected_identity.clone(),
                found: identities,
            });
        }
        Ok((stream, addr))
    }
}

/// DC attribute values from the subject of a DER certificate
pub fn peer_identities(cert: &CertificateDer<'_>) -> Result<Vec<String>, ConnectError> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| ConnectError::Handshake(format!("unparsable peer certificate: {}", e)))?;
    Ok(parsed
        .subject()
        .iter_attributes()
        .filter(|attr| attr.attr_type().to_id_string() == DOMAIN_COMPONENT_OID)
        .filter_map(|attr| attr.as_str().ok().map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DnType, KeyPair};

    fn cert_with_dc(dc: Option<&str>) -> CertificateDer<'static> {
        let mut params = CertificateParams::new(vec!["secc.local".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, "SECC");
        if let Some(dc) = dc {
            params.distinguished_name.push(
                DnType::CustomDnType(DOMAIN_COMPONENT_OID_ARCS.to_vec()),
                dc,
            );
        }
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().der().clone()
    }

    #[test]
    fn test_peer_identities() {
        assert_eq!(peer_identities(&cert_with_dc(Some("CPO"))).unwrap(), vec!["CPO"]);
        assert!(peer_identities(&cert_with_dc(None)).unwrap().is_empty());
    }

    #[test]
    fn test_empty_root_store_rejected() {
        let err = TlsClient::with_roots(RootCertStore::empty(), "CPO").err().unwrap();
        assert!(matches!(err, ConnectError::Config(_)));
    }

    #[test]
    fn test_config_defaults() {
        let config = TlsClientConfig::default();
        assert_eq!(config.expected_identity, "CPO");
        assert_eq!(config.connect_timeout_ms, 20_000);
        assert!(config.root_certs.is_empty());
    }
}
