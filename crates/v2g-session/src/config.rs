//! Session configuration
//!
//! Configuration types for both roles. Every field has a default so a
//! partial TOML/YAML file is enough.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use v2g_core::{AppProtocol, PaymentOption, TimingPolicy, ISO_15118_2_2013_NAMESPACE};
use v2g_transport::sdp::SDP_PORT;
use v2g_transport::{SdpClientConfig, TlsClientConfig, TlsServerConfig, DEFAULT_MAX_PAYLOAD_LENGTH};

/// ISO 15118-2:2010 message definitions
pub const ISO_15118_2_2010_NAMESPACE: &str = "urn:iso:15118:2:2010:MsgDef";

// =============================================================================
// EVCC
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvccConfig {
    /// SECC host, used when discovery is disabled
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Use TLS towards the SECC
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub tls_client: TlsClientConfig,
    /// Find the SECC via SDP before connecting
    #[serde(default)]
    pub use_sdp: bool,
    #[serde(default)]
    pub sdp: SdpClientConfig,
    /// Offered protocols with schema id and priority (1 = highest)
    #[serde(default = "default_evcc_app_protocols")]
    pub app_protocols: Vec<AppProtocol>,
    #[serde(default = "default_payment_option")]
    pub payment_option: PaymentOption,
    /// Key used to sign metering receipts over TLS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_signing: Option<ReceiptSigningConfig>,
    #[serde(default)]
    pub timing: TimingPolicy,
}

impl Default for EvccConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: false,
            tls_client: TlsClientConfig::default(),
            use_sdp: false,
            sdp: SdpClientConfig::default(),
            app_protocols: default_evcc_app_protocols(),
            payment_option: default_payment_option(),
            receipt_signing: None,
            timing: TimingPolicy::default(),
        }
    }
}

/// Location of the receipt signing key in the trust store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSigningConfig {
    pub keystore_path: PathBuf,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default = "default_receipt_alias")]
    pub alias: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    64109
}

fn default_evcc_app_protocols() -> Vec<AppProtocol> {
    vec![
        AppProtocol::new(ISO_15118_2_2010_NAMESPACE, 1, 0)
            .with_schema_id(9)
            .with_priority(2),
        AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 2, 0)
            .with_schema_id(10)
            .with_priority(1),
    ]
}

fn default_payment_option() -> PaymentOption {
    PaymentOption::ExternalPayment
}

fn default_receipt_alias() -> String {
    "contract_cert".to_string()
}

// =============================================================================
// SECC
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeccConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// TLS certificate and key; plain TCP when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsServerConfig>,
    /// Answer SDP requests on UDP
    #[serde(default)]
    pub sdp_enabled: bool,
    #[serde(default = "default_sdp_listen")]
    pub sdp_listen: SocketAddr,
    /// Address announced in SDP responses; the listen address when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertised_address: Option<IpAddr>,
    /// Protocols this SECC speaks, in preference order
    #[serde(default = "default_secc_app_protocols")]
    pub supported_protocols: Vec<AppProtocol>,
    #[serde(default = "default_payment_options")]
    pub payment_options: Vec<PaymentOption>,
    #[serde(default = "default_max_payload_length")]
    pub max_payload_length: u32,
    #[serde(default)]
    pub timing: TimingPolicy,
}

impl Default for SeccConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            tls: None,
            sdp_enabled: false,
            sdp_listen: default_sdp_listen(),
            advertised_address: None,
            supported_protocols: default_secc_app_protocols(),
            payment_options: default_payment_options(),
            max_payload_length: default_max_payload_length(),
            timing: TimingPolicy::default(),
        }
    }
}

impl SeccConfig {
    /// TCP endpoint announced to EVCCs for a server bound to `bound`
    pub fn advertised_endpoint(&self, bound: SocketAddr) -> SocketAddr {
        SocketAddr::new(self.advertised_address.unwrap_or(bound.ip()), bound.port())
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), default_port())
}

fn default_sdp_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), SDP_PORT)
}

fn default_secc_app_protocols() -> Vec<AppProtocol> {
    vec![AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 2, 0)]
}

fn default_payment_options() -> Vec<PaymentOption> {
    vec![PaymentOption::ExternalPayment, PaymentOption::Contract]
}

fn default_max_payload_length() -> u32 {
    DEFAULT_MAX_PAYLOAD_LENGTH
}
