//! PEM loading and the file based receipt-signing trust store

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::ring::sign::any_ecdsa_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::SigningKey;
use rustls::{RootCertStore, SignatureScheme};
use tracing::{debug, warn};
use v2g_core::{ReceiptSigner, TrustStore, TrustStoreError};

use crate::error::ConnectError;

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConnectError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ConnectError::Config(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConnectError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| ConnectError::Config(format!("no private key in {}", path.display())))
}

pub fn load_root_store(paths: &[PathBuf]) -> Result<RootCertStore, ConnectError> {
    let mut roots = RootCertStore::empty();
    for path in paths {
        for cert in load_certs(path)? {
            roots.add(cert)?;
        }
        debug!(path = %path.display(), "Loaded root certificates");
    }
    Ok(roots)
}

/// Trust store reading unencrypted PKCS#8 keys from `<keystore>/<alias>.key`
#[derive(Debug, Clone, Copy, Default)]
pub struct PemTrustStore;

impl TrustStore for PemTrustStore {
    fn load_private_key(
        &self,
        keystore_path: &Path,
        passphrase: &str,
        alias: &str,
    ) -> Result<Arc<dyn ReceiptSigner>, TrustStoreError> {
        if !passphrase.is_empty() {
            warn!(alias, "PEM keystore entries are unencrypted, passphrase ignored");
        }
        let path = keystore_path.join(format!("{}.key", alias));
        if !path.exists() {
            return Err(TrustStoreError::KeyNotFound(alias.to_string()));
        }
        let mut reader = BufReader::new(File::open(&path)?);
        let key = rustls_pemfile::private_key(&mut reader)?
            .ok_or_else(|| TrustStoreError::KeyNotFound(alias.to_string()))?;
        let key = any_ecdsa_type(&key).map_err(|e| TrustStoreError::InvalidKey(e.to_string()))?;
        Ok(Arc::new(EcdsaReceiptSigner { key }))
    }
}

/// ECDSA P-256 / SHA-256 receipt signer
#[derive(Debug)]
struct EcdsaReceiptSigner {
    key: Arc<dyn SigningKey>,
}

impl ReceiptSigner for EcdsaReceiptSigner {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, TrustStoreError> {
        let signer = self
            .key
            .choose_scheme(&[SignatureScheme::ECDSA_NISTP256_SHA256])
            .ok_or_else(|| TrustStoreError::InvalidKey("not a P-256 key".to_string()))?;
        signer
            .sign(data)
            .map_err(|e| TrustStoreError::Signing(e.to_string()))
    }
}
