//! End-to-end sessions over TLS
//!
//! Certificates are minted per test with rcgen: a root CA and an SECC leaf
//! carrying a `DC=` identity in its subject.
//!
//! Run with: cargo test -p v2g-tests --test tls_e2e_test

use std::sync::Arc;

use pretty_assertions::assert_eq;
use v2g_core::{JsonCodec, MessageCodec, TrustStore};
use v2g_session::{EvccClient, EvccConfig, ReceiptSigningConfig, SessionError, SessionOutcome};
use v2g_transport::{ConnectError, PemTrustStore, TlsServerConfig};
use v2g_tests::{evcc_config_for, loopback_secc_config, Pki, RunningSecc, TestResult, RECEIPT_KEY_ALIAS};
use v2gd::{EvSimConfig, EvseSimConfig, SimulatedEv};

async fn start_tls_secc(pki: &Pki, evse: EvseSimConfig) -> TestResult<RunningSecc> {
    let mut config = loopback_secc_config();
    config.tls = Some(TlsServerConfig {
        cert_chain: pki.cert_chain.clone(),
        private_key: pki.private_key.clone(),
    });
    RunningSecc::start(config, evse).await
}

fn tls_evcc_config(secc: &RunningSecc, roots: &Pki) -> EvccConfig {
    let mut config = evcc_config_for(secc.addr);
    config.tls = true;
    config.tls_client.root_certs = vec![roots.root_cert.clone()];
    config.tls_client.connect_timeout_ms = 5_000;
    config
}

async fn run_evcc(
    config: EvccConfig,
    ev_config: EvSimConfig,
    trust_store: Option<Arc<dyn TrustStore>>,
) -> Result<SessionOutcome, SessionError> {
    let codec: Arc<dyn MessageCodec> = Arc::new(JsonCodec);
    let ev = Arc::new(SimulatedEv::new(ev_config));
    EvccClient::new(config, ev, codec, trust_store)?.run().await
}

fn short_session() -> EvSimConfig {
    EvSimConfig {
        charging_rounds: 2,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_tls_session_with_expected_identity() -> TestResult<()> {
    let pki = Pki::mint("CPO")?;
    let secc = start_tls_secc(&pki, EvseSimConfig::default()).await?;

    let outcome = run_evcc(tls_evcc_config(&secc, &pki), short_session(), None).await?;

    assert_eq!(outcome, SessionOutcome::graceful("Session stopped"));
    secc.stop().await
}

#[tokio::test]
async fn test_identity_mismatch_aborts_before_session() -> TestResult<()> {
    let pki = Pki::mint("OEM")?;
    let secc = start_tls_secc(&pki, EvseSimConfig::default()).await?;

    let err = run_evcc(tls_evcc_config(&secc, &pki), short_session(), None)
        .await
        .unwrap_err();

    match err {
        SessionError::Connect(ConnectError::IdentityMismatch { expected, found }) => {
            assert_eq!(expected, "CPO");
            assert_eq!(found, vec!["OEM".to_string()]);
        }
        other => panic!("expected IdentityMismatch, got {:?}", other),
    }
    secc.stop().await
}

#[tokio::test]
async fn test_configured_identity_accepted() -> TestResult<()> {
    let pki = Pki::mint("OEM")?;
    let secc = start_tls_secc(&pki, EvseSimConfig::default()).await?;
    let mut config = tls_evcc_config(&secc, &pki);
    config.tls_client.expected_identity = "OEM".to_string();

    let outcome = run_evcc(config, short_session(), None).await?;

    assert!(outcome.graceful, "{}", outcome.reason);
    secc.stop().await
}

#[tokio::test]
async fn test_untrusted_root_fails_handshake() -> TestResult<()> {
    let pki = Pki::mint("CPO")?;
    let other = Pki::mint("CPO")?;
    let secc = start_tls_secc(&pki, EvseSimConfig::default()).await?;

    let err = run_evcc(tls_evcc_config(&secc, &other), short_session(), None)
        .await
        .unwrap_err();

    assert!(
        matches!(err, SessionError::Connect(ConnectError::Handshake(_))),
        "got {:?}",
        err
    );
    secc.stop().await
}

#[tokio::test]
async fn test_signed_metering_receipts() -> TestResult<()> {
    let pki = Pki::mint("CPO")?;
    let secc = start_tls_secc(
        &pki,
        EvseSimConfig {
            receipt_required: true,
            ..Default::default()
        },
    )
    .await?;
    let mut config = tls_evcc_config(&secc, &pki);
    config.receipt_signing = Some(ReceiptSigningConfig {
        keystore_path: pki.keystore().to_path_buf(),
        passphrase: String::new(),
        alias: RECEIPT_KEY_ALIAS.to_string(),
    });

    let outcome = run_evcc(config, short_session(), Some(Arc::new(PemTrustStore))).await?;

    assert_eq!(outcome, SessionOutcome::graceful("Session stopped"));
    secc.stop().await
}

#[tokio::test]
async fn test_receipt_without_signing_key_terminates() -> TestResult<()> {
    let pki = Pki::mint("CPO")?;
    let secc = start_tls_secc(
        &pki,
        EvseSimConfig {
            receipt_required: true,
            ..Default::default()
        },
    )
    .await?;

    let outcome = run_evcc(tls_evcc_config(&secc, &pki), short_session(), None).await?;

    assert!(!outcome.graceful);
    assert_eq!(
        outcome.reason,
        "Receipt required but no signing key is configured"
    );
    secc.stop().await
}

#[tokio::test]
async fn test_plain_client_against_tls_server() -> TestResult<()> {
    let pki = Pki::mint("CPO")?;
    let secc = start_tls_secc(&pki, EvseSimConfig::default()).await?;
    let mut config = evcc_config_for(secc.addr);
    config.timing.communication_setup_timeout_ms = 500;
    config
        .timing
        .message_timeouts
        .insert(v2g_core::MessageKind::SupportedAppProtocolRes, 500);

    let outcome = run_evcc(config, short_session(), None).await?;

    // The TLS server never answers plain V2GTP
    assert!(!outcome.graceful);
    secc.stop().await
}
