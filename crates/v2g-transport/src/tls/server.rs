//! SECC side TLS configuration

use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use serde::{Deserialize, Serialize};
use tokio_rustls::TlsAcceptor;

use super::pem::{load_certs, load_private_key};
use super::pinned_provider;
use crate::error::ConnectError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsServerConfig {
    /// SECC certificate chain, leaf first
    pub cert_chain: PathBuf,
    /// Private key matching the leaf certificate
    pub private_key: PathBuf,
}

impl TlsServerConfig {
    pub fn acceptor(&self) -> Result<TlsAcceptor, ConnectError> {
        let chain = load_certs(&self.cert_chain)?;
        let key = load_private_key(&self.private_key)?;
        Ok(TlsAcceptor::from(build_server_config(chain, key)?))
    }
}

/// Server configuration restricted to the pinned suite, no client auth
pub fn build_server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, ConnectError> {
    let config = ServerConfig::builder_with_provider(pinned_provider())
        .with_protocol_versions(&[&rustls::version::TLS12])?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    Ok(Arc::new(config))
}
