//! v2gd - V2G charging session daemon
//!
//! # Usage
//!
//! Charging station on the default port:
//! ```bash
//! ./v2gd secc
//! ```
//!
//! One DC session as the vehicle, discovering the station via SDP:
//! ```bash
//! ./v2gd evcc --sdp --dc
//! ```
//!
//! With a config file (TOML, or YAML by extension):
//! ```bash
//! ./v2gd --config crates/v2gd/config/v2gd.toml secc
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use v2g_core::{EnergyTransferMode, JsonCodec, MessageCodec, TrustStore};
use v2g_session::{EvccClient, SeccServer};
use v2g_transport::PemTrustStore;
use v2gd::{SimulatedEv, SimulatedEvse, V2gdConfig};

#[derive(Parser, Debug)]
#[command(name = "v2gd")]
#[command(about = "ISO 15118-2 charging session daemon with simulated EV/EVSE")]
struct Args {
    /// Configuration file path (TOML, or YAML by extension)
    /// If provided, overrides command-line options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run one charging session as the vehicle
    Evcc {
        /// SECC host (ignored with --sdp)
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 64109)]
        port: u16,

        /// Discover the SECC via SDP
        #[arg(long)]
        sdp: bool,

        /// Connect with TLS, verifying the SECC against this root certificate
        #[arg(long)]
        root_cert: Option<PathBuf>,

        /// Charge with DC instead of AC
        #[arg(long)]
        dc: bool,
    },

    /// Accept charging sessions as the charging station
    Secc {
        #[arg(long, default_value = "0.0.0.0:64109")]
        listen: SocketAddr,

        /// Answer SDP requests
        #[arg(long)]
        sdp: bool,

        /// TLS certificate chain (PEM, leaf first)
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,

        /// TLS private key (PEM)
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let default_filter = if args.verbose {
        "v2gd=debug,v2g_session=debug,v2g_transport=debug"
    } else {
        "v2gd=info,v2g_session=info,v2g_transport=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            V2gdConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => config_from_args(&args.role),
    };

    let codec: Arc<dyn MessageCodec> = Arc::new(JsonCodec);
    match args.role {
        Role::Evcc { .. } => run_evcc(config, codec).await,
        Role::Secc { .. } => run_secc(config, codec).await,
    }
}

/// Build a configuration from command-line options only
fn config_from_args(role: &Role) -> V2gdConfig {
    let mut config = V2gdConfig::default();
    match role {
        Role::Evcc {
            host,
            port,
            sdp,
            root_cert,
            dc,
        } => {
            config.evcc.host = host.clone();
            config.evcc.port = *port;
            config.evcc.use_sdp = *sdp;
            if let Some(root) = root_cert {
                config.evcc.tls = true;
                config.evcc.tls_client.root_certs = vec![root.clone()];
            }
            if *dc {
                config.ev.energy_transfer_mode = EnergyTransferMode::DcComboCore;
                config.ev.max_current = 125;
            }
        }
        Role::Secc {
            listen,
            sdp,
            cert,
            key,
        } => {
            config.secc.listen = *listen;
            config.secc.sdp_enabled = *sdp;
            if let (Some(cert), Some(key)) = (cert, key) {
                config.secc.tls = Some(v2g_transport::TlsServerConfig {
                    cert_chain: cert.clone(),
                    private_key: key.clone(),
                });
            }
        }
    }
    config
}

async fn run_evcc(config: V2gdConfig, codec: Arc<dyn MessageCodec>) -> Result<()> {
    info!(
        mode = ?config.ev.energy_transfer_mode,
        tls = config.evcc.tls,
        sdp = config.evcc.use_sdp,
        "Starting EVCC"
    );
    let trust_store: Option<Arc<dyn TrustStore>> = config
        .evcc
        .receipt_signing
        .as_ref()
        .map(|_| Arc::new(PemTrustStore) as Arc<dyn TrustStore>);
    let ev = Arc::new(SimulatedEv::new(config.ev.clone()));
    let client = EvccClient::new(config.evcc, ev.clone(), codec, trust_store)
        .context("Failed to set up the EVCC")?;

    let outcome = tokio::select! {
        outcome = client.run() => outcome.context("Charging session failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            return Ok(());
        }
    };

    if outcome.graceful {
        info!(reason = %outcome.reason, soc = ev.soc(), "Charging session complete");
        Ok(())
    } else {
        error!(reason = %outcome.reason, soc = ev.soc(), "Charging session aborted");
        anyhow::bail!("session aborted: {}", outcome.reason)
    }
}

async fn run_secc(config: V2gdConfig, codec: Arc<dyn MessageCodec>) -> Result<()> {
    info!(
        listen = %config.secc.listen,
        tls = config.secc.tls.is_some(),
        sdp = config.secc.sdp_enabled,
        "Starting SECC"
    );
    let evse = Arc::new(SimulatedEvse::new(config.evse.clone()));
    let server = SeccServer::bind(config.secc, evse, codec)
        .await
        .context("Failed to start the SECC")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Shutting down");
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await.context("SECC server failed")?;
    info!("SECC stopped");
    Ok(())
}
