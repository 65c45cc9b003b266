//! EVCC (vehicle) role
//!
//! The EVCC originates every request. Each state waits for one response
//! kind and builds the next request from the EV controller's present
//! values.

mod client;
mod session;
mod states;

pub use client::EvccClient;
pub use session::EvccSession;

use v2g_core::{Message, MessageKind, Reaction};

use crate::context::EvccContext;

pub type EvccReaction = Reaction<EvccState>;

/// EVCC states, one per awaited response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvccState {
    WaitForSupportedAppProtocolRes,
    WaitForSessionSetupRes,
    WaitForServiceDiscoveryRes,
    WaitForPaymentServiceSelectionRes,
    WaitForAuthorizationRes,
    WaitForChargeParameterDiscoveryRes,
    WaitForCableCheckRes,
    WaitForPreChargeRes,
    WaitForPowerDeliveryRes,
    WaitForChargingStatusRes,
    WaitForCurrentDemandRes,
    WaitForMeteringReceiptRes,
    WaitForSessionStopRes,
}

impl EvccState {
    /// State awaiting `kind`; `None` for kinds the EVCC never receives
    pub fn for_response(kind: MessageKind) -> Option<Self> {
        use MessageKind::*;
        match kind {
            SupportedAppProtocolRes => Some(Self::WaitForSupportedAppProtocolRes),
            SessionSetupRes => Some(Self::WaitForSessionSetupRes),
            ServiceDiscoveryRes => Some(Self::WaitForServiceDiscoveryRes),
            PaymentServiceSelectionRes => Some(Self::WaitForPaymentServiceSelectionRes),
            AuthorizationRes => Some(Self::WaitForAuthorizationRes),
            ChargeParameterDiscoveryRes => Some(Self::WaitForChargeParameterDiscoveryRes),
            CableCheckRes => Some(Self::WaitForCableCheckRes),
            PreChargeRes => Some(Self::WaitForPreChargeRes),
            PowerDeliveryRes => Some(Self::WaitForPowerDeliveryRes),
            ChargingStatusRes => Some(Self::WaitForChargingStatusRes),
            CurrentDemandRes => Some(Self::WaitForCurrentDemandRes),
            MeteringReceiptRes => Some(Self::WaitForMeteringReceiptRes),
            SessionStopRes => Some(Self::WaitForSessionStopRes),
            SupportedAppProtocolReq | SeccDiscoveryReq | SeccDiscoveryRes | SessionSetupReq
            | ServiceDiscoveryReq | PaymentServiceSelectionReq | AuthorizationReq
            | ChargeParameterDiscoveryReq | CableCheckReq | PreChargeReq | PowerDeliveryReq
            | ChargingStatusReq | CurrentDemandReq | MeteringReceiptReq | SessionStopReq => None,
        }
    }

    /// Response kind this state waits for
    pub fn expected(&self) -> MessageKind {
        match self {
            Self::WaitForSupportedAppProtocolRes => MessageKind::SupportedAppProtocolRes,
            Self::WaitForSessionSetupRes => MessageKind::SessionSetupRes,
            Self::WaitForServiceDiscoveryRes => MessageKind::ServiceDiscoveryRes,
            Self::WaitForPaymentServiceSelectionRes => MessageKind::PaymentServiceSelectionRes,
            Self::WaitForAuthorizationRes => MessageKind::AuthorizationRes,
            Self::WaitForChargeParameterDiscoveryRes => MessageKind::ChargeParameterDiscoveryRes,
            Self::WaitForCableCheckRes => MessageKind::CableCheckRes,
            Self::WaitForPreChargeRes => MessageKind::PreChargeRes,
            Self::WaitForPowerDeliveryRes => MessageKind::PowerDeliveryRes,
            Self::WaitForChargingStatusRes => MessageKind::ChargingStatusRes,
            Self::WaitForCurrentDemandRes => MessageKind::CurrentDemandRes,
            Self::WaitForMeteringReceiptRes => MessageKind::MeteringReceiptRes,
            Self::WaitForSessionStopRes => MessageKind::SessionStopRes,
        }
    }

    pub fn process_incoming(&self, message: &Message, ctx: &mut EvccContext) -> EvccReaction {
        match self {
            Self::WaitForSupportedAppProtocolRes => states::supported_app_protocol_res(message, ctx),
            Self::WaitForSessionSetupRes => states::session_setup_res(message, ctx),
            Self::WaitForServiceDiscoveryRes => states::service_discovery_res(message, ctx),
            Self::WaitForPaymentServiceSelectionRes => {
                states::payment_service_selection_res(message, ctx)
            }
            Self::WaitForAuthorizationRes => states::authorization_res(message, ctx),
            Self::WaitForChargeParameterDiscoveryRes => {
                states::charge_parameter_discovery_res(message, ctx)
            }
            Self::WaitForCableCheckRes => states::cable_check_res(message, ctx),
            Self::WaitForPreChargeRes => states::pre_charge_res(message, ctx),
            Self::WaitForPowerDeliveryRes => states::power_delivery_res(message, ctx),
            Self::WaitForChargingStatusRes => states::charging_status_res(message, ctx),
            Self::WaitForCurrentDemandRes => states::current_demand_res(message, ctx),
            Self::WaitForMeteringReceiptRes => states::metering_receipt_res(message, ctx),
            Self::WaitForSessionStopRes => states::session_stop_res(message, ctx),
        }
    }
}

/// First message of every EVCC session
pub fn supported_app_protocol_req(ctx: &EvccContext) -> Message {
    states::supported_app_protocol_req(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_response_has_a_state() {
        for kind in MessageKind::ALL {
            let state = EvccState::for_response(kind);
            if kind.is_request() || matches!(kind, MessageKind::SeccDiscoveryRes) {
                assert_eq!(state, None, "{kind}");
            } else {
                assert_eq!(state.map(|s| s.expected()), Some(kind));
            }
        }
    }
}
