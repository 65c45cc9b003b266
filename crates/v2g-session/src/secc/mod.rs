//! SECC (charging station) role
//!
//! The SECC answers requests. Each state handles one request kind; the
//! fork state accepts any one kind out of a small allowed set. A request of
//! the wrong kind is answered with a sequence error built by the state
//! that would normally handle it.

mod fork;
mod negotiation;
mod server;
mod session;
mod states;

pub use fork::ForkState;
pub use negotiation::negotiate;
pub use server::SeccServer;
pub use session::SeccSession;

use tracing::warn;
use v2g_core::{
    AppProtocolResponseCode, AuthorizationRes, Body, CableCheckRes, ChargeParameterDiscoveryRes,
    ChargingStatusRes, CurrentDemandRes, EvseProcessing, EvseStatus, Message, MessageKind,
    MeteringReceiptRes, Next, PaymentServiceSelectionRes, PowerDeliveryRes, PreChargeRes, Reaction,
    ResponseCode, ServiceDiscoveryRes, SessionSetupRes, SessionStopRes, SupportedAppProtocolRes,
};

use crate::context::SeccContext;

pub type SeccReaction = Reaction<SeccState>;

/// SECC states, one per awaited request plus the fork state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeccState {
    WaitForSupportedAppProtocolReq,
    WaitForSeccDiscoveryReq,
    WaitForSessionSetupReq,
    WaitForServiceDiscoveryReq,
    WaitForPaymentServiceSelectionReq,
    WaitForAuthorizationReq,
    WaitForChargeParameterDiscoveryReq,
    WaitForCableCheckReq,
    WaitForPreChargeReq,
    WaitForPowerDeliveryReq,
    WaitForChargingStatusReq,
    WaitForCurrentDemandReq,
    WaitForMeteringReceiptReq,
    WaitForSessionStopReq,
    Fork(ForkState),
}

impl SeccState {
    /// State handling `kind`; `None` for kinds the SECC never receives
    pub fn for_request(kind: MessageKind) -> Option<Self> {
        use MessageKind::*;
        match kind {
            SupportedAppProtocolReq => Some(Self::WaitForSupportedAppProtocolReq),
            SeccDiscoveryReq => Some(Self::WaitForSeccDiscoveryReq),
            SessionSetupReq => Some(Self::WaitForSessionSetupReq),
            ServiceDiscoveryReq => Some(Self::WaitForServiceDiscoveryReq),
            PaymentServiceSelectionReq => Some(Self::WaitForPaymentServiceSelectionReq),
            AuthorizationReq => Some(Self::WaitForAuthorizationReq),
            ChargeParameterDiscoveryReq => Some(Self::WaitForChargeParameterDiscoveryReq),
            CableCheckReq => Some(Self::WaitForCableCheckReq),
            PreChargeReq => Some(Self::WaitForPreChargeReq),
            PowerDeliveryReq => Some(Self::WaitForPowerDeliveryReq),
            ChargingStatusReq => Some(Self::WaitForChargingStatusReq),
            CurrentDemandReq => Some(Self::WaitForCurrentDemandReq),
            MeteringReceiptReq => Some(Self::WaitForMeteringReceiptReq),
            SessionStopReq => Some(Self::WaitForSessionStopReq),
            SupportedAppProtocolRes | SeccDiscoveryRes | SessionSetupRes | ServiceDiscoveryRes
            | PaymentServiceSelectionRes | AuthorizationRes | ChargeParameterDiscoveryRes
            | CableCheckRes | PreChargeRes | PowerDeliveryRes | ChargingStatusRes
            | CurrentDemandRes | MeteringReceiptRes | SessionStopRes => None,
        }
    }

    /// Request kind this state handles; `None` for the fork state
    pub fn expected(&self) -> Option<MessageKind> {
        use MessageKind::*;
        let kind = match self {
            Self::WaitForSupportedAppProtocolReq => SupportedAppProtocolReq,
            Self::WaitForSeccDiscoveryReq => SeccDiscoveryReq,
            Self::WaitForSessionSetupReq => SessionSetupReq,
            Self::WaitForServiceDiscoveryReq => ServiceDiscoveryReq,
            Self::WaitForPaymentServiceSelectionReq => PaymentServiceSelectionReq,
            Self::WaitForAuthorizationReq => AuthorizationReq,
            Self::WaitForChargeParameterDiscoveryReq => ChargeParameterDiscoveryReq,
            Self::WaitForCableCheckReq => CableCheckReq,
            Self::WaitForPreChargeReq => PreChargeReq,
            Self::WaitForPowerDeliveryReq => PowerDeliveryReq,
            Self::WaitForChargingStatusReq => ChargingStatusReq,
            Self::WaitForCurrentDemandReq => CurrentDemandReq,
            Self::WaitForMeteringReceiptReq => MeteringReceiptReq,
            Self::WaitForSessionStopReq => SessionStopReq,
            Self::Fork(_) => return None,
        };
        Some(kind)
    }

    /// Human readable name for logs and termination reasons
    pub fn name(&self) -> String {
        match self {
            Self::Fork(fork) => format!("Fork{:?}", fork.allowed()),
            other => format!("{:?}", other),
        }
    }

    /// Response of this state's kind carrying a failure code
    ///
    /// `None` where the kind has no failure response (SECC discovery) and
    /// for the fork state.
    pub fn failed_response(&self, ctx: &SeccContext, code: ResponseCode) -> Option<Body> {
        let controller = &ctx.controller;
        let body: Body = match self {
            Self::WaitForSupportedAppProtocolReq => SupportedAppProtocolRes {
                response_code: AppProtocolResponseCode::FailedNoNegotiation,
                schema_id: None,
            }
            .into(),
            Self::WaitForSeccDiscoveryReq | Self::Fork(_) => return None,
            Self::WaitForSessionSetupReq => SessionSetupRes {
                response_code: code,
                evse_id: controller.evse_id(),
                timestamp: None,
            }
            .into(),
            Self::WaitForServiceDiscoveryReq => ServiceDiscoveryRes {
                response_code: code,
                payment_options: Vec::new(),
                energy_transfer_modes: Vec::new(),
            }
            .into(),
            Self::WaitForPaymentServiceSelectionReq => {
                PaymentServiceSelectionRes { response_code: code }.into()
            }
            Self::WaitForAuthorizationReq => AuthorizationRes {
                response_code: code,
                evse_processing: EvseProcessing::Finished,
            }
            .into(),
            Self::WaitForChargeParameterDiscoveryReq => ChargeParameterDiscoveryRes {
                response_code: code,
                evse_processing: EvseProcessing::Finished,
                sa_schedule_tuple_id: None,
                evse_max_current: None,
            }
            .into(),
            Self::WaitForCableCheckReq => CableCheckRes {
                response_code: code,
                evse_processing: EvseProcessing::Finished,
                evse_status: EvseStatus::default(),
            }
            .into(),
            Self::WaitForPreChargeReq => PreChargeRes {
                response_code: code,
                present_voltage: controller.present_voltage(),
                evse_status: EvseStatus::default(),
            }
            .into(),
            Self::WaitForPowerDeliveryReq => PowerDeliveryRes {
                response_code: code,
                evse_status: EvseStatus::default(),
            }
            .into(),
            Self::WaitForChargingStatusReq => ChargingStatusRes {
                response_code: code,
                evse_id: controller.evse_id(),
                sa_schedule_tuple_id: ctx.sa_schedule_tuple_id,
                evse_max_current: None,
                meter_info: None,
                receipt_required: false,
                evse_status: EvseStatus::default(),
            }
            .into(),
            Self::WaitForCurrentDemandReq => CurrentDemandRes {
                response_code: code,
                present_voltage: controller.present_voltage(),
                present_current: controller.present_current(),
                evse_id: controller.evse_id(),
                sa_schedule_tuple_id: ctx.sa_schedule_tuple_id,
                meter_info: None,
                receipt_required: false,
                evse_status: EvseStatus::default(),
            }
            .into(),
            Self::WaitForMeteringReceiptReq => MeteringReceiptRes {
                response_code: code,
                evse_status: EvseStatus::default(),
            }
            .into(),
            Self::WaitForSessionStopReq => SessionStopRes { response_code: code }.into(),
        };
        Some(body)
    }

    /// Whether this state runs before a session id exists
    fn is_sessionless(&self) -> bool {
        matches!(
            self,
            Self::WaitForSupportedAppProtocolReq
                | Self::WaitForSeccDiscoveryReq
                | Self::WaitForSessionSetupReq
        )
    }

    pub fn process_incoming(&mut self, message: &Message, ctx: &mut SeccContext) -> SeccReaction {
        match self {
            Self::Fork(fork) => return fork.process_incoming(message, ctx),
            Self::WaitForSupportedAppProtocolReq => return negotiation::process(message, ctx),
            _ => {}
        }

        if self.expected() != Some(message.kind()) {
            return out_of_sequence(self, message, ctx);
        }
        if !self.is_sessionless() && message.session_id != ctx.session_id {
            warn!(
                received = %message.session_id,
                expected = %ctx.session_id,
                kind = %message.kind(),
                "Unknown session id"
            );
            return match self.failed_response(ctx, ResponseCode::FailedUnknownSession) {
                Some(body) => Reaction::send(
                    Message::new(ctx.session_id, body),
                    Next::End,
                    ctx.timing.sequence_timeout(),
                ),
                None => Reaction::terminate("Unknown session id"),
            };
        }

        match self {
            Self::WaitForSeccDiscoveryReq => states::secc_discovery_req(ctx),
            Self::WaitForSessionSetupReq => states::session_setup_req(message, ctx),
            Self::WaitForServiceDiscoveryReq => states::service_discovery_req(ctx),
            Self::WaitForPaymentServiceSelectionReq => {
                states::payment_service_selection_req(message, ctx)
            }
            Self::WaitForAuthorizationReq => states::authorization_req(ctx),
            Self::WaitForChargeParameterDiscoveryReq => {
                states::charge_parameter_discovery_req(message, ctx)
            }
            Self::WaitForCableCheckReq => states::cable_check_req(ctx),
            Self::WaitForPreChargeReq => states::pre_charge_req(message, ctx),
            Self::WaitForPowerDeliveryReq => states::power_delivery_req(message, ctx),
            Self::WaitForChargingStatusReq => states::charging_status_req(ctx),
            Self::WaitForCurrentDemandReq => states::current_demand_req(message, ctx),
            Self::WaitForMeteringReceiptReq => states::metering_receipt_req(message, ctx),
            Self::WaitForSessionStopReq => states::session_stop_req(message, ctx),
            Self::WaitForSupportedAppProtocolReq | Self::Fork(_) => {
                Reaction::terminate(format!("{} cannot handle {}", self.name(), message.kind()))
            }
        }
    }
}

/// A request of the wrong kind arrived in `current`
fn out_of_sequence(current: &SeccState, message: &Message, ctx: &SeccContext) -> SeccReaction {
    let kind = message.kind();
    match SeccState::for_request(kind) {
        Some(resolved) => {
            warn!(state = %current.name(), %kind, "Request out of sequence");
            sequence_error(&resolved, ctx)
        }
        None => Reaction::terminate(format!(
            "Invalid message ({}) at this state ({})",
            kind,
            current.name()
        )),
    }
}

/// Sequence error response built by `resolved`, keeping the current state
pub(crate) fn sequence_error(resolved: &SeccState, ctx: &SeccContext) -> SeccReaction {
    match resolved.failed_response(ctx, ResponseCode::FailedSequenceError) {
        Some(body) => Reaction::send(
            Message::new(ctx.session_id, body),
            Next::Remain,
            ctx.timing.sequence_timeout(),
        ),
        None => Reaction::terminate(format!(
            "Sequence error for {} which has no failure response",
            resolved.name()
        )),
    }
}
