//! Message kinds used for routing

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every message kind exchanged by the EVCC and SECC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    SupportedAppProtocolReq,
    SupportedAppProtocolRes,
    SeccDiscoveryReq,
    SeccDiscoveryRes,
    SessionSetupReq,
    SessionSetupRes,
    ServiceDiscoveryReq,
    ServiceDiscoveryRes,
    PaymentServiceSelectionReq,
    PaymentServiceSelectionRes,
    AuthorizationReq,
    AuthorizationRes,
    ChargeParameterDiscoveryReq,
    ChargeParameterDiscoveryRes,
    CableCheckReq,
    CableCheckRes,
    PreChargeReq,
    PreChargeRes,
    PowerDeliveryReq,
    PowerDeliveryRes,
    ChargingStatusReq,
    ChargingStatusRes,
    CurrentDemandReq,
    CurrentDemandRes,
    MeteringReceiptReq,
    MeteringReceiptRes,
    SessionStopReq,
    SessionStopRes,
}

impl MessageKind {
    pub const ALL: [MessageKind; 28] = [
        Self::SupportedAppProtocolReq,
        Self::SupportedAppProtocolRes,
        Self::SeccDiscoveryReq,
        Self::SeccDiscoveryRes,
        Self::SessionSetupReq,
        Self::SessionSetupRes,
        Self::ServiceDiscoveryReq,
        Self::ServiceDiscoveryRes,
        Self::PaymentServiceSelectionReq,
        Self::PaymentServiceSelectionRes,
        Self::AuthorizationReq,
        Self::AuthorizationRes,
        Self::ChargeParameterDiscoveryReq,
        Self::ChargeParameterDiscoveryRes,
        Self::CableCheckReq,
        Self::CableCheckRes,
        Self::PreChargeReq,
        Self::PreChargeRes,
        Self::PowerDeliveryReq,
        Self::PowerDeliveryRes,
        Self::ChargingStatusReq,
        Self::ChargingStatusRes,
        Self::CurrentDemandReq,
        Self::CurrentDemandRes,
        Self::MeteringReceiptReq,
        Self::MeteringReceiptRes,
        Self::SessionStopReq,
        Self::SessionStopRes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupportedAppProtocolReq => "SupportedAppProtocolReq",
            Self::SupportedAppProtocolRes => "SupportedAppProtocolRes",
            Self::SeccDiscoveryReq => "SECCDiscoveryReq",
            Self::SeccDiscoveryRes => "SECCDiscoveryRes",
            Self::SessionSetupReq => "SessionSetupReq",
            Self::SessionSetupRes => "SessionSetupRes",
            Self::ServiceDiscoveryReq => "ServiceDiscoveryReq",
            Self::ServiceDiscoveryRes => "ServiceDiscoveryRes",
            Self::PaymentServiceSelectionReq => "PaymentServiceSelectionReq",
            Self::PaymentServiceSelectionRes => "PaymentServiceSelectionRes",
            Self::AuthorizationReq => "AuthorizationReq",
            Self::AuthorizationRes => "AuthorizationRes",
            Self::ChargeParameterDiscoveryReq => "ChargeParameterDiscoveryReq",
            Self::ChargeParameterDiscoveryRes => "ChargeParameterDiscoveryRes",
            Self::CableCheckReq => "CableCheckReq",
            Self::CableCheckRes => "CableCheckRes",
            Self::PreChargeReq => "PreChargeReq",
            Self::PreChargeRes => "PreChargeRes",
            Self::PowerDeliveryReq => "PowerDeliveryReq",
            Self::PowerDeliveryRes => "PowerDeliveryRes",
            Self::ChargingStatusReq => "ChargingStatusReq",
            Self::ChargingStatusRes => "ChargingStatusRes",
            Self::CurrentDemandReq => "CurrentDemandReq",
            Self::CurrentDemandRes => "CurrentDemandRes",
            Self::MeteringReceiptReq => "MeteringReceiptReq",
            Self::MeteringReceiptRes => "MeteringReceiptRes",
            Self::SessionStopReq => "SessionStopReq",
            Self::SessionStopRes => "SessionStopRes",
        }
    }

    /// Requests are sent by the EVCC, responses by the SECC
    pub fn is_request(&self) -> bool {
        (*self as usize) % 2 == 0
    }

    /// The response kind answering this request (identity for responses)
    pub fn response_kind(&self) -> MessageKind {
        if self.is_request() {
            Self::ALL[*self as usize + 1]
        } else {
            *self
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
