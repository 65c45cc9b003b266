//! SECC request handlers
//!
//! Each handler runs after the kind and session id have been checked.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use v2g_core::{
    AuthorizationRes, Body, CableCheckRes, ChargeParameterDiscoveryReq,
    ChargeParameterDiscoveryRes, ChargeProgress, ChargingStatusRes, CurrentDemandReq,
    CurrentDemandRes, EvseProcessing, EvseStatus, Message, MessageKind, MeteringReceiptReq,
    MeteringReceiptRes, Next, PaymentServiceSelectionReq, PaymentServiceSelectionRes,
    PowerDeliveryReq, PowerDeliveryRes, PreChargeReq, PreChargeRes, Reaction, ResponseCode,
    SeccDiscoveryRes, ServiceDiscoveryRes, SessionId, SessionSetupReq, SessionSetupRes,
    SessionStopReq, SessionStopRes, TransportProtocol,
};

use super::SeccReaction;
use crate::context::SeccContext;

fn respond(ctx: &SeccContext, body: impl Into<Body>, next: Next) -> SeccReaction {
    Reaction::send(
        Message::new(ctx.session_id, body),
        next,
        ctx.timing.sequence_timeout(),
    )
}

fn evse_status(ctx: &SeccContext) -> EvseStatus {
    EvseStatus {
        notification: ctx.controller.notification(),
        notification_max_delay: 0,
    }
}

/// Request that keeps the charging loop of the negotiated mode going
fn loop_request(ctx: &SeccContext) -> MessageKind {
    if ctx.is_dc() {
        MessageKind::CurrentDemandReq
    } else {
        MessageKind::ChargingStatusReq
    }
}

/// Whether this round asks the EV for a metering receipt
fn receipt_required(ctx: &SeccContext) -> bool {
    ctx.is_tls && ctx.controller.is_receipt_required()
}

/// Next step while charging: loop, power delivery, or a receipt
fn charging_loop_fork(ctx: &SeccContext) -> Next {
    let mut allowed = vec![loop_request(ctx), MessageKind::PowerDeliveryReq];
    if receipt_required(ctx) {
        allowed.push(MessageKind::MeteringReceiptReq);
    }
    Next::Fork(allowed)
}

pub(super) fn secc_discovery_req(ctx: &SeccContext) -> SeccReaction {
    let Some(endpoint) = ctx.settings.advertised else {
        return Reaction::terminate("No endpoint to advertise for SECC discovery");
    };
    let res = SeccDiscoveryRes {
        address: endpoint.ip(),
        port: endpoint.port(),
        security: ctx.settings.security,
        transport_protocol: TransportProtocol::Tcp,
    };
    Reaction::send(
        Message::sessionless(res),
        Next::Expect(MessageKind::SupportedAppProtocolReq),
        ctx.timing.sequence_timeout(),
    )
}

pub(super) fn session_setup_req(message: &Message, ctx: &mut SeccContext) -> SeccReaction {
    let evcc_id = message
        .payload::<SessionSetupReq>()
        .map(|req| req.evcc_id.clone())
        .unwrap_or_default();

    let response_code = if !message.session_id.is_none() && message.session_id == ctx.session_id {
        ResponseCode::OkOldSessionJoined
    } else {
        ctx.session_id = SessionId::generate();
        ctx.controller.session_started(ctx.session_id);
        ResponseCode::OkNewSessionEstablished
    };
    info!(session_id = %ctx.session_id, %evcc_id, code = %response_code, "Session setup");

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_secs()).ok());
    let res = SessionSetupRes {
        response_code,
        evse_id: ctx.controller.evse_id(),
        timestamp,
    };
    respond(ctx, res, Next::Expect(MessageKind::ServiceDiscoveryReq))
}

pub(super) fn service_discovery_req(ctx: &mut SeccContext) -> SeccReaction {
    let res = ServiceDiscoveryRes {
        response_code: ResponseCode::Ok,
        payment_options: ctx.settings.payment_options.clone(),
        energy_transfer_modes: ctx.controller.supported_energy_transfer_modes(),
    };
    respond(ctx, res, Next::Expect(MessageKind::PaymentServiceSelectionReq))
}

pub(super) fn payment_service_selection_req(
    message: &Message,
    ctx: &mut SeccContext,
) -> SeccReaction {
    let selected = message
        .payload::<PaymentServiceSelectionReq>()
        .map(|req| req.selected_payment_option);
    match selected {
        Some(option) if ctx.settings.payment_options.contains(&option) => {
            debug!(?option, "Payment option selected");
            let res = PaymentServiceSelectionRes {
                response_code: ResponseCode::Ok,
            };
            respond(ctx, res, Next::Expect(MessageKind::AuthorizationReq))
        }
        other => {
            warn!(selected = ?other, "Payment option not offered");
            let res = PaymentServiceSelectionRes {
                response_code: ResponseCode::FailedPaymentSelectionInvalid,
            };
            respond(ctx, res, Next::End)
        }
    }
}

pub(super) fn authorization_req(ctx: &mut SeccContext) -> SeccReaction {
    let evse_processing = if ctx.controller.is_authorized() {
        EvseProcessing::Finished
    } else {
        EvseProcessing::Ongoing
    };
    let next = match evse_processing {
        EvseProcessing::Finished => MessageKind::ChargeParameterDiscoveryReq,
        EvseProcessing::Ongoing => MessageKind::AuthorizationReq,
    };
    let res = AuthorizationRes {
        response_code: ResponseCode::Ok,
        evse_processing,
    };
    respond(ctx, res, Next::Expect(next))
}

pub(super) fn charge_parameter_discovery_req(
    message: &Message,
    ctx: &mut SeccContext,
) -> SeccReaction {
    let Some(req) = message.payload::<ChargeParameterDiscoveryReq>() else {
        return Reaction::terminate("Malformed ChargeParameterDiscoveryReq");
    };
    let mode = req.requested_energy_transfer_mode;
    if !ctx.controller.supported_energy_transfer_modes().contains(&mode) {
        warn!(?mode, "Requested energy transfer mode not supported");
        let res = ChargeParameterDiscoveryRes {
            response_code: ResponseCode::FailedWrongEnergyTransferMode,
            evse_processing: EvseProcessing::Finished,
            sa_schedule_tuple_id: None,
            evse_max_current: None,
        };
        return respond(ctx, res, Next::End);
    }
    ctx.energy_transfer_mode = Some(mode);

    let res = ChargeParameterDiscoveryRes {
        response_code: ResponseCode::Ok,
        evse_processing: EvseProcessing::Finished,
        sa_schedule_tuple_id: Some(ctx.sa_schedule_tuple_id),
        evse_max_current: Some(ctx.controller.max_current()),
    };
    let next = if mode.is_dc() {
        MessageKind::CableCheckReq
    } else {
        MessageKind::PowerDeliveryReq
    };
    respond(ctx, res, Next::Expect(next))
}

pub(super) fn cable_check_req(ctx: &mut SeccContext) -> SeccReaction {
    let (evse_processing, next) = if ctx.controller.is_cable_check_finished() {
        (EvseProcessing::Finished, MessageKind::PreChargeReq)
    } else {
        (EvseProcessing::Ongoing, MessageKind::CableCheckReq)
    };
    let res = CableCheckRes {
        response_code: ResponseCode::Ok,
        evse_processing,
        evse_status: evse_status(ctx),
    };
    respond(ctx, res, Next::Expect(next))
}

pub(super) fn pre_charge_req(message: &Message, ctx: &mut SeccContext) -> SeccReaction {
    if let Some(req) = message.payload::<PreChargeReq>() {
        ctx.controller
            .set_target(req.target_voltage, req.target_current);
    }
    let res = PreChargeRes {
        response_code: ResponseCode::Ok,
        present_voltage: ctx.controller.present_voltage(),
        evse_status: evse_status(ctx),
    };
    respond(
        ctx,
        res,
        Next::Fork(vec![MessageKind::PreChargeReq, MessageKind::PowerDeliveryReq]),
    )
}

pub(super) fn power_delivery_req(message: &Message, ctx: &mut SeccContext) -> SeccReaction {
    let Some(req) = message.payload::<PowerDeliveryReq>() else {
        return Reaction::terminate("Malformed PowerDeliveryReq");
    };
    let progress = req.charge_progress;
    info!(%progress, "Power delivery");
    ctx.last_charge_progress = Some(progress);

    let next = match progress {
        ChargeProgress::Start => {
            Next::Fork(vec![loop_request(ctx), MessageKind::PowerDeliveryReq])
        }
        ChargeProgress::Stop => {
            ctx.stop_charging_requested = true;
            Next::Expect(MessageKind::SessionStopReq)
        }
        ChargeProgress::Renegotiate => Next::Expect(MessageKind::ChargeParameterDiscoveryReq),
    };
    let res = PowerDeliveryRes {
        response_code: ResponseCode::Ok,
        evse_status: EvseStatus::default(),
    };
    respond(ctx, res, next)
}

pub(super) fn charging_status_req(ctx: &mut SeccContext) -> SeccReaction {
    let controller = &ctx.controller;
    let res = ChargingStatusRes {
        response_code: ResponseCode::Ok,
        evse_id: controller.evse_id(),
        sa_schedule_tuple_id: ctx.sa_schedule_tuple_id,
        evse_max_current: Some(controller.max_current()),
        meter_info: Some(controller.meter_info()),
        receipt_required: receipt_required(ctx),
        evse_status: evse_status(ctx),
    };
    respond(ctx, res, charging_loop_fork(ctx))
}

pub(super) fn current_demand_req(message: &Message, ctx: &mut SeccContext) -> SeccReaction {
    if let Some(req) = message.payload::<CurrentDemandReq>() {
        ctx.controller
            .set_target(req.target_voltage, req.target_current);
        if req.charging_complete {
            debug!("EV reports charging complete");
        }
    }
    let controller = &ctx.controller;
    let res = CurrentDemandRes {
        response_code: ResponseCode::Ok,
        present_voltage: controller.present_voltage(),
        present_current: controller.present_current(),
        evse_id: controller.evse_id(),
        sa_schedule_tuple_id: ctx.sa_schedule_tuple_id,
        meter_info: Some(controller.meter_info()),
        receipt_required: receipt_required(ctx),
        evse_status: evse_status(ctx),
    };
    respond(ctx, res, charging_loop_fork(ctx))
}

pub(super) fn metering_receipt_req(message: &Message, ctx: &mut SeccContext) -> SeccReaction {
    let signed = message
        .payload::<MeteringReceiptReq>()
        .map(|req| req.signature.is_some())
        .unwrap_or(false);
    if ctx.is_tls && !signed {
        warn!("Metering receipt without signature");
        let res = MeteringReceiptRes {
            response_code: ResponseCode::FailedSignatureError,
            evse_status: EvseStatus::default(),
        };
        return respond(ctx, res, Next::End);
    }

    let res = MeteringReceiptRes {
        response_code: ResponseCode::Ok,
        evse_status: evse_status(ctx),
    };
    respond(
        ctx,
        res,
        Next::Fork(vec![loop_request(ctx), MessageKind::PowerDeliveryReq]),
    )
}

pub(super) fn session_stop_req(message: &Message, ctx: &mut SeccContext) -> SeccReaction {
    if let Some(req) = message.payload::<SessionStopReq>() {
        info!(session_id = %ctx.session_id, charging_session = ?req.charging_session, "Session stop");
    }
    ctx.session_complete = true;
    let res = SessionStopRes {
        response_code: ResponseCode::Ok,
    };
    respond(ctx, res, Next::End)
}
