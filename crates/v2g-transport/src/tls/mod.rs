//! TLS for the EVCC/SECC link
//!
//! Both roles share one crypto provider restricted to
//! `TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256` over TLS 1.2 and secp256r1.

mod client;
mod pem;
mod server;
mod verifier;

pub use client::{
    peer_identities, TlsClient, TlsClientConfig, DOMAIN_COMPONENT_OID, DOMAIN_COMPONENT_OID_ARCS,
};
pub use pem::{load_certs, load_private_key, load_root_store, PemTrustStore};
pub use server::{build_server_config, TlsServerConfig};
pub use tokio_rustls::TlsAcceptor;

use std::sync::Arc;

use rustls::crypto::{ring, CryptoProvider};

/// Crypto provider with the pinned cipher suite and key exchange group
pub fn pinned_provider() -> Arc<CryptoProvider> {
    let mut provider = ring::default_provider();
    provider.cipher_suites = vec![ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256];
    provider.kx_groups = vec![ring::kx_group::SECP256R1];
    Arc::new(provider)
}
