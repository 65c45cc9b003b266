//! End-to-end tests for V2G charging sessions
//!
//! The tests run both roles in one process over loopback:
//! - an [`SeccServer`] with a simulated EVSE on an ephemeral port
//! - an [`EvccClient`] with a simulated EV, over plain TCP, TLS or SDP
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p v2g-tests
//! ```
//!
//! # Test Structure
//!
//! - `session_e2e_test.rs` - AC/DC sessions, SDP discovery, server shutdown
//! - `tls_e2e_test.rs` - TLS sessions, peer identity checks, signed receipts
//! - `mock_pair_test.rs` - both session drivers over an in-memory transport

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use v2g_core::{JsonCodec, MessageCodec};
use v2g_session::{EvccConfig, SeccConfig, SeccServer, SessionError};
use v2g_transport::DOMAIN_COMPONENT_OID_ARCS;
use v2gd::{EvseSimConfig, SimulatedEvse};

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Alias of the receipt signing key written by [`Pki::mint`]
pub const RECEIPT_KEY_ALIAS: &str = "contract_cert";

/// Certificates and keys for one TLS test, removed on drop
pub struct Pki {
    pub dir: TempDir,
    pub root_cert: PathBuf,
    pub cert_chain: PathBuf,
    pub private_key: PathBuf,
}

impl Pki {
    /// Root CA plus an SECC leaf whose subject carries `DC=<identity>`
    ///
    /// Also writes an EV receipt signing key as `<dir>/contract_cert.key`.
    pub fn mint(identity: &str) -> TestResult<Self> {
        let dir = tempfile::tempdir()?;

        let ca_key = KeyPair::generate()?;
        let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "V2G Root CA");
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let leaf_key = KeyPair::generate()?;
        let mut leaf_params = CertificateParams::new(vec!["secc.local".to_string()])?;
        leaf_params.distinguished_name.push(DnType::CommonName, "SECC");
        leaf_params.distinguished_name.push(
            DnType::CustomDnType(DOMAIN_COMPONENT_OID_ARCS.to_vec()),
            identity,
        );
        let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key)?;

        let root_cert = write(dir.path(), "root.pem", &ca_cert.pem())?;
        let cert_chain = write(
            dir.path(),
            "secc_chain.pem",
            &format!("{}{}", leaf_cert.pem(), ca_cert.pem()),
        )?;
        let private_key = write(dir.path(), "secc.key", &leaf_key.serialize_pem())?;

        let receipt_key = KeyPair::generate()?;
        write(
            dir.path(),
            &format!("{}.key", RECEIPT_KEY_ALIAS),
            &receipt_key.serialize_pem(),
        )?;

        Ok(Self {
            dir,
            root_cert,
            cert_chain,
            private_key,
        })
    }

    pub fn keystore(&self) -> &Path {
        self.dir.path()
    }
}

fn write(dir: &Path, name: &str, content: &str) -> TestResult<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}

/// SECC listening on an ephemeral loopback port
pub fn loopback_secc_config() -> SeccConfig {
    SeccConfig {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        sdp_listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..Default::default()
    }
}

/// EVCC pointed straight at `addr`
pub fn evcc_config_for(addr: SocketAddr) -> EvccConfig {
    EvccConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        ..Default::default()
    }
}

/// SECC server running in a background task
pub struct RunningSecc {
    pub addr: SocketAddr,
    pub sdp_addr: Option<SocketAddr>,
    pub evse: Arc<SimulatedEvse>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), SessionError>>,
}

impl RunningSecc {
    pub async fn start(config: SeccConfig, evse: EvseSimConfig) -> TestResult<Self> {
        let evse = Arc::new(SimulatedEvse::new(evse));
        let codec: Arc<dyn MessageCodec> = Arc::new(JsonCodec);
        let server = SeccServer::bind(config, evse.clone(), codec).await?;
        let addr = server.local_addr()?;
        let sdp_addr = server.sdp_addr();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(server.run(shutdown_rx));
        Ok(Self {
            addr,
            sdp_addr,
            evse,
            shutdown,
            task,
        })
    }

    /// Signal shutdown and wait for every session task to finish
    pub async fn stop(self) -> TestResult<()> {
        let _ = self.shutdown.send(true);
        self.task.await??;
        Ok(())
    }
}
