//! Per-connection session state

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use v2g_core::{
    AppProtocol, ChargeProgress, EnergyTransferMode, EvController, EvseController, OngoingTimer,
    PaymentOption, Security, SessionId, TimingPolicy, TrustStore,
};

use crate::config::{EvccConfig, ReceiptSigningConfig, SeccConfig};

/// Mutable record owned by exactly one session
///
/// `C` is the physical controller of the role, `S` its static settings.
/// The current state lives next to the context in the session driver.
pub struct SessionContext<C: ?Sized, S> {
    pub session_id: SessionId,
    pub is_tls: bool,
    /// Start of a multi round trip negotiation (cable check, pre-charge, ongoing)
    pub ongoing_timer: OngoingTimer,
    pub stop_charging_requested: bool,
    pub negotiated_protocol: Option<AppProtocol>,
    pub energy_transfer_mode: Option<EnergyTransferMode>,
    pub last_charge_progress: Option<ChargeProgress>,
    pub sa_schedule_tuple_id: u8,
    /// Set once the exchange completed normally
    pub session_complete: bool,
    pub timing: Arc<TimingPolicy>,
    pub controller: Arc<C>,
    pub settings: Arc<S>,
}

impl<C: ?Sized, S> SessionContext<C, S> {
    pub fn new(controller: Arc<C>, settings: Arc<S>, timing: Arc<TimingPolicy>, is_tls: bool) -> Self {
        Self {
            session_id: SessionId::NONE,
            is_tls,
            ongoing_timer: OngoingTimer::default(),
            stop_charging_requested: false,
            negotiated_protocol: None,
            energy_transfer_mode: None,
            last_charge_progress: None,
            sa_schedule_tuple_id: 1,
            session_complete: false,
            timing,
            controller,
            settings,
        }
    }

    /// Wait budget for one round of a negotiation bounded by `max`
    ///
    /// Starts the ongoing timer on the first round. `None` once the
    /// negotiation has run longer than `max`.
    pub fn continue_negotiation(&mut self, max: Duration, per_message: Duration) -> Option<Duration> {
        if !self.ongoing_timer.is_active() {
            self.ongoing_timer.start();
        }
        self.ongoing_timer
            .remaining(max)
            .map(|remaining| remaining.min(per_message))
    }

    pub fn is_dc(&self) -> bool {
        self.energy_transfer_mode
            .map(|mode| mode.is_dc())
            .unwrap_or(false)
    }
}

/// Runtime settings of the EVCC role
pub struct EvccSettings {
    pub app_protocols: Vec<AppProtocol>,
    pub payment_option: PaymentOption,
    pub receipt_signing: Option<ReceiptSigningConfig>,
    pub trust_store: Option<Arc<dyn TrustStore>>,
}

impl EvccSettings {
    pub fn from_config(config: &EvccConfig, trust_store: Option<Arc<dyn TrustStore>>) -> Self {
        Self {
            app_protocols: config.app_protocols.clone(),
            payment_option: config.payment_option,
            receipt_signing: config.receipt_signing.clone(),
            trust_store,
        }
    }
}

/// Runtime settings of the SECC role
#[derive(Debug, Clone)]
pub struct SeccSettings {
    pub supported_protocols: Vec<AppProtocol>,
    pub payment_options: Vec<PaymentOption>,
    /// Endpoint announced when a discovery request arrives on a session
    pub advertised: Option<SocketAddr>,
    pub security: Security,
}

impl SeccSettings {
    pub fn from_config(config: &SeccConfig, advertised: Option<SocketAddr>) -> Self {
        Self {
            supported_protocols: config.supported_protocols.clone(),
            payment_options: config.payment_options.clone(),
            advertised,
            security: if config.tls.is_some() {
                Security::Tls
            } else {
                Security::NoTls
            },
        }
    }
}

pub type EvccContext = SessionContext<dyn EvController, EvccSettings>;
pub type SeccContext = SessionContext<dyn EvseController, SeccSettings>;
