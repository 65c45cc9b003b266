//! EVCC state handlers and request builders

use std::time::Duration;

use tracing::{debug, error, info, warn};
use v2g_core::{
    AppProtocolResponseCode, AuthorizationReq, AuthorizationRes, Body, CableCheckReq, CableCheckRes,
    ChargeParameterDiscoveryReq, ChargeParameterDiscoveryRes, ChargeProgress, ChargingSession,
    ChargingStatusReq, ChargingStatusRes, CurrentDemandReq, CurrentDemandRes, EvseNotification,
    EvseProcessing, Message, MessageKind, MeterInfo, MeteringReceiptReq, MeteringReceiptRes, Next,
    PaymentServiceSelectionReq, PaymentServiceSelectionRes, PowerDeliveryReq, PowerDeliveryRes,
    PreChargeReq, PreChargeRes, Reaction, ServiceDiscoveryReq, ServiceDiscoveryRes, SessionId,
    SessionSetupReq, SessionSetupRes, SessionStopReq, SessionStopRes, SupportedAppProtocolReq,
    SupportedAppProtocolRes,
};

use super::EvccReaction;
use crate::context::EvccContext;
use crate::validation::{is_valid, ValidationError};

// =============================================================================
// Helpers
// =============================================================================

/// Send `body` and wait for `expect` with its configured timeout
fn send(ctx: &EvccContext, body: impl Into<Body>, expect: MessageKind) -> EvccReaction {
    let timeout = ctx.timing.timeout_for(expect);
    send_within(ctx, body, expect, timeout)
}

fn send_within(
    ctx: &EvccContext,
    body: impl Into<Body>,
    expect: MessageKind,
    timeout: Duration,
) -> EvccReaction {
    Reaction::send(
        Message::new(ctx.session_id, body),
        Next::Expect(expect),
        timeout,
    )
}

fn invalid(err: ValidationError) -> EvccReaction {
    error!(error = %err, "Incoming message raised an error");
    Reaction::terminate("Incoming message raised an error")
}

macro_rules! valid {
    ($ty:ty, $message:expr) => {
        match is_valid::<$ty>($message) {
            Ok(payload) => payload,
            Err(err) => return invalid(err),
        }
    };
}

// =============================================================================
// Request builders
// =============================================================================

pub(super) fn supported_app_protocol_req(ctx: &EvccContext) -> Message {
    Message::sessionless(SupportedAppProtocolReq {
        app_protocols: ctx.settings.app_protocols.clone(),
    })
}

fn charge_parameter_discovery_req(ctx: &EvccContext) -> ChargeParameterDiscoveryReq {
    let controller = &ctx.controller;
    let mode = ctx
        .energy_transfer_mode
        .unwrap_or_else(|| controller.energy_transfer_mode());
    ChargeParameterDiscoveryReq {
        requested_energy_transfer_mode: mode,
        max_voltage: controller.max_voltage(),
        max_current: controller.max_current(),
        dc_ev_status: mode.is_dc().then(|| controller.dc_ev_status()),
    }
}

fn pre_charge_req(ctx: &EvccContext) -> PreChargeReq {
    PreChargeReq {
        dc_ev_status: ctx.controller.dc_ev_status(),
        target_voltage: ctx.controller.target_voltage(),
        target_current: ctx.controller.target_current(),
    }
}

fn current_demand_req(ctx: &EvccContext) -> CurrentDemandReq {
    CurrentDemandReq {
        dc_ev_status: ctx.controller.dc_ev_status(),
        target_voltage: ctx.controller.target_voltage(),
        target_current: ctx.controller.target_current(),
        charging_complete: ctx.controller.is_charging_complete(),
    }
}

fn power_delivery(ctx: &mut EvccContext, progress: ChargeProgress) -> EvccReaction {
    info!(%progress, "Requesting power delivery");
    ctx.last_charge_progress = Some(progress);
    let req = PowerDeliveryReq {
        charge_progress: progress,
        sa_schedule_tuple_id: ctx.sa_schedule_tuple_id,
        dc_ev_status: ctx.is_dc().then(|| ctx.controller.dc_ev_status()),
    };
    send(ctx, req, MessageKind::PowerDeliveryRes)
}

fn stop_charging(ctx: &mut EvccContext) -> EvccReaction {
    ctx.stop_charging_requested = true;
    power_delivery(ctx, ChargeProgress::Stop)
}

/// Next request of the AC or DC charging loop
fn charging_loop_req(ctx: &EvccContext) -> EvccReaction {
    if ctx.is_dc() {
        send(ctx, current_demand_req(ctx), MessageKind::CurrentDemandRes)
    } else {
        send(ctx, ChargingStatusReq::default(), MessageKind::ChargingStatusRes)
    }
}

/// React to the EVSE notification of a charging loop response
fn charging_loop(ctx: &mut EvccContext, notification: EvseNotification) -> EvccReaction {
    match notification {
        EvseNotification::StopCharging => {
            info!("EVSE requested to stop charging");
            stop_charging(ctx)
        }
        EvseNotification::ReNegotiation => {
            info!("EVSE requested a renegotiation");
            power_delivery(ctx, ChargeProgress::Renegotiate)
        }
        EvseNotification::None => {
            let active = ctx.controller.is_charging_loop_active()
                && !(ctx.is_dc() && ctx.controller.is_charging_complete());
            if active {
                charging_loop_req(ctx)
            } else {
                info!("Charging loop finished");
                stop_charging(ctx)
            }
        }
    }
}

/// Sign a metering receipt with the configured contract key
fn metering_receipt_req(
    ctx: &EvccContext,
    meter_info: MeterInfo,
    sa_schedule_tuple_id: u8,
) -> Result<MeteringReceiptReq, String> {
    let signing = ctx
        .settings
        .receipt_signing
        .as_ref()
        .ok_or("Receipt required but no signing key is configured")?;
    let store = ctx
        .settings
        .trust_store
        .as_ref()
        .ok_or("Receipt required but no trust store is available")?;

    let mut req = MeteringReceiptReq {
        session_id: ctx.session_id,
        sa_schedule_tuple_id,
        meter_info,
        signature: None,
    };
    let content = req.signed_content().map_err(|e| e.to_string())?;
    let signer = store
        .load_private_key(&signing.keystore_path, &signing.passphrase, &signing.alias)
        .map_err(|e| format!("Failed to load receipt signing key: {}", e))?;
    req.signature = Some(
        signer
            .sign(&content)
            .map_err(|e| format!("Failed to sign metering receipt: {}", e))?,
    );
    Ok(req)
}

/// Metering receipt round trip, when the EVSE asks for one over TLS
fn receipt_if_required(
    ctx: &EvccContext,
    receipt_required: bool,
    meter_info: Option<&MeterInfo>,
    evse_id: &str,
    sa_schedule_tuple_id: u8,
) -> Option<EvccReaction> {
    if !receipt_required || !ctx.is_tls {
        return None;
    }
    let meter_info = meter_info.cloned().unwrap_or_else(|| MeterInfo {
        meter_id: evse_id.to_string(),
        meter_reading: None,
        t_meter: None,
    });
    Some(
        match metering_receipt_req(ctx, meter_info, sa_schedule_tuple_id) {
            Ok(req) => send(ctx, req, MessageKind::MeteringReceiptRes),
            Err(reason) => {
                error!(%reason, "Cannot send metering receipt");
                Reaction::terminate(reason)
            }
        },
    )
}

// =============================================================================
// States
// =============================================================================

pub(super) fn supported_app_protocol_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    let res = valid!(SupportedAppProtocolRes, message);
    if res.response_code == AppProtocolResponseCode::FailedNoNegotiation {
        error!("SECC supports none of the offered protocols");
        return Reaction::terminate("No common application protocol with the SECC");
    }

    let negotiated = res.schema_id.and_then(|schema_id| {
        ctx.settings
            .app_protocols
            .iter()
            .find(|p| p.schema_id == schema_id)
            .cloned()
    });
    let Some(protocol) = negotiated else {
        return Reaction::terminate(format!(
            "SECC selected unknown schema id {:?}",
            res.schema_id
        ));
    };
    info!(
        namespace = %protocol.namespace,
        major = protocol.major,
        minor = protocol.minor,
        code = ?res.response_code,
        "Application protocol negotiated"
    );
    ctx.negotiated_protocol = Some(protocol);

    ctx.session_id = SessionId::NONE;
    let req = SessionSetupReq {
        evcc_id: ctx.controller.evcc_id(),
    };
    send(ctx, req, MessageKind::SessionSetupRes)
}

pub(super) fn session_setup_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    let res = valid!(SessionSetupRes, message);
    ctx.session_id = message.session_id;
    info!(session_id = %ctx.session_id, evse_id = %res.evse_id, code = %res.response_code, "Session established");
    send(ctx, ServiceDiscoveryReq::default(), MessageKind::ServiceDiscoveryRes)
}

pub(super) fn service_discovery_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    let res = valid!(ServiceDiscoveryRes, message);

    let payment_option = ctx.settings.payment_option;
    if !res.payment_options.contains(&payment_option) {
        return Reaction::terminate(format!(
            "SECC does not offer payment option {:?}",
            payment_option
        ));
    }
    let mode = ctx.controller.energy_transfer_mode();
    if !res.energy_transfer_modes.contains(&mode) {
        return Reaction::terminate(format!(
            "SECC does not offer energy transfer mode {:?}",
            mode
        ));
    }
    ctx.energy_transfer_mode = Some(mode);
    debug!(?payment_option, ?mode, "Services selected");

    let req = PaymentServiceSelectionReq {
        selected_payment_option: payment_option,
    };
    send(ctx, req, MessageKind::PaymentServiceSelectionRes)
}

pub(super) fn payment_service_selection_res(
    message: &Message,
    ctx: &mut EvccContext,
) -> EvccReaction {
    valid!(PaymentServiceSelectionRes, message);
    send(ctx, AuthorizationReq::default(), MessageKind::AuthorizationRes)
}

pub(super) fn authorization_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    let res = valid!(AuthorizationRes, message);
    match res.evse_processing {
        EvseProcessing::Finished => {
            ctx.ongoing_timer.clear();
            info!("Authorization finished");
            let req = charge_parameter_discovery_req(ctx);
            send(ctx, req, MessageKind::ChargeParameterDiscoveryRes)
        }
        EvseProcessing::Ongoing => {
            let (max, per_message) = (
                ctx.timing.ongoing_timeout(),
                ctx.timing.timeout_for(MessageKind::AuthorizationRes),
            );
            match ctx.continue_negotiation(max, per_message) {
                Some(timeout) => send_within(
                    ctx,
                    AuthorizationReq::default(),
                    MessageKind::AuthorizationRes,
                    timeout,
                ),
                None => Reaction::terminate("Authorization timer timed out for AuthorizationReq"),
            }
        }
    }
}

pub(super) fn charge_parameter_discovery_res(
    message: &Message,
    ctx: &mut EvccContext,
) -> EvccReaction {
    let res = valid!(ChargeParameterDiscoveryRes, message);
    match res.evse_processing {
        EvseProcessing::Finished => {
            ctx.ongoing_timer.clear();
            ctx.sa_schedule_tuple_id = res.sa_schedule_tuple_id.unwrap_or(1);
            if let Some(max_current) = res.evse_max_current {
                ctx.controller.adjust_max_current(max_current);
            }
            if ctx.is_dc() {
                let req = CableCheckReq {
                    dc_ev_status: ctx.controller.dc_ev_status(),
                };
                send(ctx, req, MessageKind::CableCheckRes)
            } else {
                power_delivery(ctx, ChargeProgress::Start)
            }
        }
        EvseProcessing::Ongoing => {
            let (max, per_message) = (
                ctx.timing.ongoing_timeout(),
                ctx.timing.timeout_for(MessageKind::ChargeParameterDiscoveryRes),
            );
            match ctx.continue_negotiation(max, per_message) {
                Some(timeout) => {
                    let req = charge_parameter_discovery_req(ctx);
                    send_within(ctx, req, MessageKind::ChargeParameterDiscoveryRes, timeout)
                }
                None => Reaction::terminate(
                    "ChargeParameterDiscovery timer timed out for ChargeParameterDiscoveryReq",
                ),
            }
        }
    }
}

pub(super) fn cable_check_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    let res = valid!(CableCheckRes, message);
    match res.evse_processing {
        EvseProcessing::Finished => {
            info!("Cable check finished, starting pre-charge");
            // The pre-charge phase is bounded from its first request
            ctx.ongoing_timer.start();
            send(ctx, pre_charge_req(ctx), MessageKind::PreChargeRes)
        }
        EvseProcessing::Ongoing => {
            let (max, per_message) = (
                ctx.timing.cable_check_max(),
                ctx.timing.timeout_for(MessageKind::CableCheckRes),
            );
            match ctx.continue_negotiation(max, per_message) {
                Some(timeout) => {
                    let req = CableCheckReq {
                        dc_ev_status: ctx.controller.dc_ev_status(),
                    };
                    send_within(ctx, req, MessageKind::CableCheckRes, timeout)
                }
                None => {
                    warn!(elapsed = ?ctx.ongoing_timer.elapsed(), "Cable check exceeded its budget");
                    Reaction::terminate("CableCheck timer timed out for CableCheckReq")
                }
            }
        }
    }
}

pub(super) fn pre_charge_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    let res = valid!(PreChargeRes, message);
    let target = ctx.controller.target_voltage();
    if res.present_voltage.magnitude_eq(&target) {
        ctx.ongoing_timer.clear();
        info!(present = %res.present_voltage, "Pre-charge reached target voltage");
        return power_delivery(ctx, ChargeProgress::Start);
    }

    let (max, per_message) = (
        ctx.timing.pre_charge_max(),
        ctx.timing.timeout_for(MessageKind::PreChargeRes),
    );
    match ctx.continue_negotiation(max, per_message) {
        Some(timeout) => {
            debug!(present = %res.present_voltage, %target, "Pre-charge ongoing");
            send_within(ctx, pre_charge_req(ctx), MessageKind::PreChargeRes, timeout)
        }
        None => {
            warn!(elapsed = ?ctx.ongoing_timer.elapsed(), "Pre-charge exceeded its budget");
            Reaction::terminate("PreCharge timer timed out for PreChargeReq")
        }
    }
}

pub(super) fn power_delivery_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    valid!(PowerDeliveryRes, message);
    match ctx.last_charge_progress {
        Some(ChargeProgress::Start) => {
            info!("Charging started");
            charging_loop_req(ctx)
        }
        Some(ChargeProgress::Stop) => {
            let req = SessionStopReq {
                charging_session: ChargingSession::Terminate,
            };
            send(ctx, req, MessageKind::SessionStopRes)
        }
        Some(ChargeProgress::Renegotiate) => {
            let req = charge_parameter_discovery_req(ctx);
            send(ctx, req, MessageKind::ChargeParameterDiscoveryRes)
        }
        None => Reaction::terminate("PowerDeliveryRes received without a pending PowerDeliveryReq"),
    }
}

pub(super) fn charging_status_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    let res = valid!(ChargingStatusRes, message);
    if let Some(reaction) = receipt_if_required(
        ctx,
        res.receipt_required,
        res.meter_info.as_ref(),
        &res.evse_id,
        res.sa_schedule_tuple_id,
    ) {
        return reaction;
    }
    if let Some(max_current) = res.evse_max_current {
        ctx.controller.adjust_max_current(max_current);
    }
    charging_loop(ctx, res.evse_status.notification)
}

pub(super) fn current_demand_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    let res = valid!(CurrentDemandRes, message);
    if let Some(reaction) = receipt_if_required(
        ctx,
        res.receipt_required,
        res.meter_info.as_ref(),
        &res.evse_id,
        res.sa_schedule_tuple_id,
    ) {
        return reaction;
    }
    debug!(voltage = %res.present_voltage, current = %res.present_current, "Current demand");
    charging_loop(ctx, res.evse_status.notification)
}

pub(super) fn metering_receipt_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    let res = valid!(MeteringReceiptRes, message);
    charging_loop(ctx, res.evse_status.notification)
}

pub(super) fn session_stop_res(message: &Message, ctx: &mut EvccContext) -> EvccReaction {
    valid!(SessionStopRes, message);
    ctx.session_complete = true;
    info!(session_id = %ctx.session_id, "Session stopped");
    Reaction::terminate("Session stopped")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use v2g_core::controller::{MockEvController, MockReceiptSigner, MockTrustStore};
    use v2g_core::*;

    use super::*;
    use crate::config::ReceiptSigningConfig;
    use crate::context::{EvccSettings, SessionContext};

    const SESSION: SessionId = SessionId([7; 8]);

    fn settings() -> EvccSettings {
        EvccSettings {
            app_protocols: vec![AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 2, 0)
                .with_schema_id(10)
                .with_priority(1)],
            payment_option: PaymentOption::ExternalPayment,
            receipt_signing: None,
            trust_store: None,
        }
    }

    fn context_with(controller: MockEvController, settings: EvccSettings, is_tls: bool) -> EvccContext {
        let controller: Arc<dyn EvController> = Arc::new(controller);
        let mut ctx = SessionContext::new(
            controller,
            Arc::new(settings),
            Arc::new(TimingPolicy::default()),
            is_tls,
        );
        ctx.session_id = SESSION;
        ctx
    }

    fn dc_context(controller: MockEvController) -> EvccContext {
        let mut ctx = context_with(controller, settings(), false);
        ctx.energy_transfer_mode = Some(EnergyTransferMode::DcExtended);
        ctx
    }

    fn ac_context(controller: MockEvController) -> EvccContext {
        let mut ctx = context_with(controller, settings(), false);
        ctx.energy_transfer_mode = Some(EnergyTransferMode::AcThreePhaseCore);
        ctx
    }

    fn dc_status() -> DcEvStatus {
        DcEvStatus {
            ev_ready: true,
            error_code: DcEvErrorCode::NoError,
            ress_soc: 40,
        }
    }

    fn dc_controller() -> MockEvController {
        let mut controller = MockEvController::new();
        controller.expect_dc_ev_status().returning(dc_status);
        controller
            .expect_target_voltage()
            .returning(|| PhysicalValue::volts(400, 0));
        controller
            .expect_target_current()
            .returning(|| PhysicalValue::amperes(10, 0));
        controller
    }

    fn expect_send(reaction: EvccReaction) -> (Message, Next, Duration) {
        match reaction {
            Reaction::Send {
                message,
                next,
                timeout,
            } => (message, next, timeout),
            other => panic!("expected Send, got {:?}", other),
        }
    }

    fn terminated(reaction: EvccReaction) -> String {
        match reaction {
            Reaction::Terminate { reason } => reason,
            other => panic!("expected Terminate, got {:?}", other),
        }
    }

    fn pre_charge_res_msg(present: PhysicalValue) -> Message {
        Message::new(
            SESSION,
            PreChargeRes {
                response_code: ResponseCode::Ok,
                present_voltage: present,
                evse_status: EvseStatus::default(),
            },
        )
    }

    // -------------------------------------------------------------------------
    // Handshake
    // -------------------------------------------------------------------------

    #[test]
    fn test_negotiation_failure_terminates() {
        let mut ctx = context_with(MockEvController::new(), settings(), false);
        let message = Message::sessionless(SupportedAppProtocolRes {
            response_code: AppProtocolResponseCode::FailedNoNegotiation,
            schema_id: None,
        });
        let reason = terminated(supported_app_protocol_res(&message, &mut ctx));
        assert!(reason.contains("No common application protocol"));
    }

    #[test]
    fn test_negotiation_success_sends_session_setup_without_id() {
        let mut controller = MockEvController::new();
        controller
            .expect_evcc_id()
            .returning(|| "0A0B0C0D0E0F".to_string());
        let mut ctx = context_with(controller, settings(), false);
        let message = Message::sessionless(SupportedAppProtocolRes {
            response_code: AppProtocolResponseCode::SuccessfulNegotiation,
            schema_id: Some(10),
        });

        let (sent, next, timeout) = expect_send(supported_app_protocol_res(&message, &mut ctx));

        assert_eq!(sent.session_id, SessionId::NONE);
        assert_eq!(sent.kind(), MessageKind::SessionSetupReq);
        assert_eq!(next, Next::Expect(MessageKind::SessionSetupRes));
        assert_eq!(timeout, Duration::from_millis(2000));
        assert_eq!(
            ctx.negotiated_protocol.map(|p| p.schema_id),
            Some(10)
        );
    }

    #[test]
    fn test_session_setup_stores_assigned_id() {
        let mut ctx = context_with(MockEvController::new(), settings(), false);
        ctx.session_id = SessionId::NONE;
        let message = Message::new(
            SESSION,
            SessionSetupRes {
                response_code: ResponseCode::OkNewSessionEstablished,
                evse_id: "DE*ABC*E1".to_string(),
                timestamp: None,
            },
        );

        let (sent, _, _) = expect_send(session_setup_res(&message, &mut ctx));

        assert_eq!(ctx.session_id, SESSION);
        assert_eq!(sent.session_id, SESSION);
        assert_eq!(sent.kind(), MessageKind::ServiceDiscoveryReq);
    }

    #[test]
    fn test_service_discovery_without_mode_terminates() {
        let mut controller = MockEvController::new();
        controller
            .expect_energy_transfer_mode()
            .returning(|| EnergyTransferMode::DcExtended);
        let mut ctx = context_with(controller, settings(), false);
        let message = Message::new(
            SESSION,
            ServiceDiscoveryRes {
                response_code: ResponseCode::Ok,
                payment_options: vec![PaymentOption::ExternalPayment],
                energy_transfer_modes: vec![EnergyTransferMode::AcThreePhaseCore],
            },
        );
        assert!(service_discovery_res(&message, &mut ctx).is_terminate());
    }

    #[test]
    fn test_failed_response_code_terminates() {
        let mut ctx = context_with(MockEvController::new(), settings(), false);
        let message = Message::new(
            SESSION,
            PaymentServiceSelectionRes {
                response_code: ResponseCode::FailedSequenceError,
            },
        );
        assert_eq!(
            terminated(payment_service_selection_res(&message, &mut ctx)),
            "Incoming message raised an error"
        );
    }

    #[test]
    fn test_unexpected_kind_terminates() {
        let mut ctx = context_with(MockEvController::new(), settings(), false);
        let message = Message::new(SESSION, ChargingStatusReq::default());
        assert_eq!(
            terminated(session_stop_res(&message, &mut ctx)),
            "Incoming message raised an error"
        );
    }

    // -------------------------------------------------------------------------
    // Ongoing negotiations
    // -------------------------------------------------------------------------

    #[test]
    fn test_authorization_ongoing_resends_within_budget() {
        let mut ctx = context_with(MockEvController::new(), settings(), false);
        let message = Message::new(
            SESSION,
            AuthorizationRes {
                response_code: ResponseCode::Ok,
                evse_processing: EvseProcessing::Ongoing,
            },
        );

        let (sent, next, timeout) = expect_send(authorization_res(&message, &mut ctx));

        assert_eq!(sent.kind(), MessageKind::AuthorizationReq);
        assert_eq!(next, Next::Expect(MessageKind::AuthorizationRes));
        assert!(timeout <= Duration::from_millis(2000));
        assert!(ctx.ongoing_timer.is_active());
    }

    #[test]
    fn test_authorization_ongoing_past_budget_terminates() {
        let mut ctx = context_with(MockEvController::new(), settings(), false);
        ctx.ongoing_timer
            .start_at(Instant::now() - Duration::from_millis(61_000));
        let message = Message::new(
            SESSION,
            AuthorizationRes {
                response_code: ResponseCode::Ok,
                evse_processing: EvseProcessing::Ongoing,
            },
        );
        assert_eq!(
            terminated(authorization_res(&message, &mut ctx)),
            "Authorization timer timed out for AuthorizationReq"
        );
    }

    #[test]
    fn test_charge_parameter_discovery_dc_moves_to_cable_check() {
        let mut controller = dc_controller();
        controller
            .expect_adjust_max_current()
            .with(eq(PhysicalValue::amperes(125, 0)))
            .times(1)
            .return_const(());
        let mut ctx = dc_context(controller);
        let message = Message::new(
            SESSION,
            ChargeParameterDiscoveryRes {
                response_code: ResponseCode::Ok,
                evse_processing: EvseProcessing::Finished,
                sa_schedule_tuple_id: Some(3),
                evse_max_current: Some(PhysicalValue::amperes(125, 0)),
            },
        );

        let (sent, next, _) = expect_send(charge_parameter_discovery_res(&message, &mut ctx));

        assert_eq!(sent.kind(), MessageKind::CableCheckReq);
        assert_eq!(next, Next::Expect(MessageKind::CableCheckRes));
        assert_eq!(ctx.sa_schedule_tuple_id, 3);
    }

    #[test]
    fn test_charge_parameter_discovery_ac_starts_power_delivery() {
        let mut ctx = ac_context(MockEvController::new());
        let message = Message::new(
            SESSION,
            ChargeParameterDiscoveryRes {
                response_code: ResponseCode::Ok,
                evse_processing: EvseProcessing::Finished,
                sa_schedule_tuple_id: None,
                evse_max_current: None,
            },
        );

        let (sent, _, timeout) = expect_send(charge_parameter_discovery_res(&message, &mut ctx));

        let req = sent.payload::<PowerDeliveryReq>().expect("power delivery");
        assert_eq!(req.charge_progress, ChargeProgress::Start);
        assert_eq!(req.sa_schedule_tuple_id, 1);
        assert_eq!(req.dc_ev_status, None);
        assert_eq!(timeout, Duration::from_millis(5000));
        assert_eq!(ctx.last_charge_progress, Some(ChargeProgress::Start));
    }

    #[test]
    fn test_cable_check_finished_starts_pre_charge_timer() {
        let mut ctx = dc_context(dc_controller());
        let message = Message::new(
            SESSION,
            CableCheckRes {
                response_code: ResponseCode::Ok,
                evse_processing: EvseProcessing::Finished,
                evse_status: EvseStatus::default(),
            },
        );

        let (sent, next, _) = expect_send(cable_check_res(&message, &mut ctx));

        assert_eq!(sent.kind(), MessageKind::PreChargeReq);
        assert_eq!(next, Next::Expect(MessageKind::PreChargeRes));
        assert!(ctx.ongoing_timer.is_active());
    }

    #[test]
    fn test_cable_check_ongoing_starts_timer_and_resends() {
        let mut ctx = dc_context(dc_controller());
        let message = Message::new(
            SESSION,
            CableCheckRes {
                response_code: ResponseCode::Ok,
                evse_processing: EvseProcessing::Ongoing,
                evse_status: EvseStatus::default(),
            },
        );

        let (sent, _, timeout) = expect_send(cable_check_res(&message, &mut ctx));

        assert_eq!(sent.kind(), MessageKind::CableCheckReq);
        assert!(timeout <= Duration::from_millis(2000));
        assert!(ctx.ongoing_timer.is_active());
    }

    #[test]
    fn test_cable_check_ongoing_past_budget_terminates() {
        let mut ctx = dc_context(dc_controller());
        ctx.ongoing_timer
            .start_at(Instant::now() - Duration::from_millis(39_000));
        let message = Message::new(
            SESSION,
            CableCheckRes {
                response_code: ResponseCode::Ok,
                evse_processing: EvseProcessing::Ongoing,
                evse_status: EvseStatus::default(),
            },
        );
        assert_eq!(
            terminated(cable_check_res(&message, &mut ctx)),
            "CableCheck timer timed out for CableCheckReq"
        );
    }

    // -------------------------------------------------------------------------
    // Pre-charge
    // -------------------------------------------------------------------------

    #[test]
    fn test_pre_charge_reached_target_clears_timer() {
        let mut ctx = dc_context(dc_controller());
        ctx.ongoing_timer.start();

        // 4000e-1 V equals the 400 V target
        let (sent, next, _) = expect_send(pre_charge_res(
            &pre_charge_res_msg(PhysicalValue::volts(4000, -1)),
            &mut ctx,
        ));

        let req = sent.payload::<PowerDeliveryReq>().expect("power delivery");
        assert_eq!(req.charge_progress, ChargeProgress::Start);
        assert_eq!(req.dc_ev_status, Some(dc_status()));
        assert_eq!(next, Next::Expect(MessageKind::PowerDeliveryRes));
        assert!(!ctx.ongoing_timer.is_active());
    }

    #[test]
    fn test_pre_charge_below_target_resends_with_remaining_budget() {
        let mut ctx = dc_context(dc_controller());
        ctx.ongoing_timer
            .start_at(Instant::now() - Duration::from_millis(6_500));

        let (sent, next, timeout) = expect_send(pre_charge_res(
            &pre_charge_res_msg(PhysicalValue::volts(380, 0)),
            &mut ctx,
        ));

        assert_eq!(sent.kind(), MessageKind::PreChargeReq);
        assert_eq!(next, Next::Expect(MessageKind::PreChargeRes));
        assert!(timeout > Duration::ZERO);
        assert!(timeout <= Duration::from_millis(500));
    }

    #[test]
    fn test_pre_charge_first_round_uses_message_timeout() {
        let mut ctx = dc_context(dc_controller());

        let (_, _, timeout) = expect_send(pre_charge_res(
            &pre_charge_res_msg(PhysicalValue::volts(10, 0)),
            &mut ctx,
        ));

        assert_eq!(timeout, Duration::from_millis(2000));
        assert!(ctx.ongoing_timer.is_active());
    }

    #[test]
    fn test_pre_charge_past_deadline_terminates() {
        let mut ctx = dc_context(dc_controller());
        ctx.ongoing_timer
            .start_at(Instant::now() - Duration::from_millis(8_000));
        assert_eq!(
            terminated(pre_charge_res(
                &pre_charge_res_msg(PhysicalValue::volts(380, 0)),
                &mut ctx,
            )),
            "PreCharge timer timed out for PreChargeReq"
        );
    }

    // -------------------------------------------------------------------------
    // Power delivery and charging loops
    // -------------------------------------------------------------------------

    #[rstest]
    #[case(ChargeProgress::Start, MessageKind::ChargingStatusReq)]
    #[case(ChargeProgress::Stop, MessageKind::SessionStopReq)]
    #[case(ChargeProgress::Renegotiate, MessageKind::ChargeParameterDiscoveryReq)]
    fn test_power_delivery_res_follows_requested_progress(
        #[case] progress: ChargeProgress,
        #[case] expected: MessageKind,
    ) {
        let mut controller = MockEvController::new();
        controller
            .expect_max_voltage()
            .returning(|| PhysicalValue::volts(230, 0));
        controller
            .expect_max_current()
            .returning(|| PhysicalValue::amperes(32, 0));
        let mut ctx = ac_context(controller);
        ctx.last_charge_progress = Some(progress);
        let message = Message::new(
            SESSION,
            PowerDeliveryRes {
                response_code: ResponseCode::Ok,
                evse_status: EvseStatus::default(),
            },
        );

        let (sent, _, _) = expect_send(power_delivery_res(&message, &mut ctx));

        assert_eq!(sent.kind(), expected);
    }

    fn charging_status(notification: EvseNotification) -> Message {
        Message::new(
            SESSION,
            ChargingStatusRes {
                response_code: ResponseCode::Ok,
                evse_id: "DE*ABC*E1".to_string(),
                sa_schedule_tuple_id: 1,
                evse_max_current: Some(PhysicalValue::amperes(16, 0)),
                meter_info: None,
                receipt_required: false,
                evse_status: EvseStatus {
                    notification,
                    notification_max_delay: 0,
                },
            },
        )
    }

    #[rstest]
    #[case(EvseNotification::StopCharging, true, ChargeProgress::Stop, true)]
    #[case(EvseNotification::ReNegotiation, true, ChargeProgress::Renegotiate, false)]
    #[case(EvseNotification::None, false, ChargeProgress::Stop, true)]
    fn test_charging_status_dispatch(
        #[case] notification: EvseNotification,
        #[case] loop_active: bool,
        #[case] progress: ChargeProgress,
        #[case] stop_requested: bool,
    ) {
        let mut controller = MockEvController::new();
        controller.expect_adjust_max_current().return_const(());
        controller
            .expect_is_charging_loop_active()
            .return_const(loop_active);
        let mut ctx = ac_context(controller);

        let (sent, next, _) = expect_send(charging_status_res(&charging_status(notification), &mut ctx));

        let req = sent.payload::<PowerDeliveryReq>().expect("power delivery");
        assert_eq!(req.charge_progress, progress);
        assert_eq!(next, Next::Expect(MessageKind::PowerDeliveryRes));
        assert_eq!(ctx.stop_charging_requested, stop_requested);
    }

    #[test]
    fn test_charging_status_continues_loop() {
        let mut controller = MockEvController::new();
        controller
            .expect_adjust_max_current()
            .with(eq(PhysicalValue::amperes(16, 0)))
            .times(1)
            .return_const(());
        controller.expect_is_charging_loop_active().return_const(true);
        let mut ctx = ac_context(controller);

        let (sent, next, _) = expect_send(charging_status_res(
            &charging_status(EvseNotification::None),
            &mut ctx,
        ));

        assert_eq!(sent.kind(), MessageKind::ChargingStatusReq);
        assert_eq!(next, Next::Expect(MessageKind::ChargingStatusRes));
    }

    #[test]
    fn test_current_demand_stops_when_charging_complete() {
        let mut controller = dc_controller();
        controller.expect_is_charging_loop_active().return_const(true);
        controller.expect_is_charging_complete().return_const(true);
        let mut ctx = dc_context(controller);
        let message = Message::new(
            SESSION,
            CurrentDemandRes {
                response_code: ResponseCode::Ok,
                present_voltage: PhysicalValue::volts(400, 0),
                present_current: PhysicalValue::amperes(100, 0),
                evse_id: "DE*ABC*E1".to_string(),
                sa_schedule_tuple_id: 1,
                meter_info: None,
                receipt_required: false,
                evse_status: EvseStatus::default(),
            },
        );

        let (sent, _, _) = expect_send(current_demand_res(&message, &mut ctx));

        let req = sent.payload::<PowerDeliveryReq>().expect("power delivery");
        assert_eq!(req.charge_progress, ChargeProgress::Stop);
        assert!(ctx.stop_charging_requested);
    }

    #[test]
    fn test_receipt_ignored_without_tls() {
        let mut controller = MockEvController::new();
        controller.expect_is_charging_loop_active().return_const(true);
        let mut ctx = ac_context(controller);
        let mut message = charging_status(EvseNotification::None);
        if let Body::ChargingStatusRes(res) = &mut message.body {
            res.receipt_required = true;
            res.evse_max_current = None;
        }

        let (sent, _, _) = expect_send(charging_status_res(&message, &mut ctx));

        assert_eq!(sent.kind(), MessageKind::ChargingStatusReq);
    }

    #[test]
    fn test_receipt_signed_over_tls() {
        let mut signer = MockReceiptSigner::new();
        signer.expect_sign().returning(|_| Ok(vec![0xAB; 64]));
        let signer: Arc<dyn ReceiptSigner> = Arc::new(signer);
        let mut store = MockTrustStore::new();
        store
            .expect_load_private_key()
            .withf(|_, _, alias| alias.to_string() == "contract_cert")
            .times(1)
            .returning(move |_, _, _| Ok(signer.clone()));

        let mut settings = settings();
        settings.receipt_signing = Some(ReceiptSigningConfig {
            keystore_path: "/keys".into(),
            passphrase: String::new(),
            alias: "contract_cert".to_string(),
        });
        settings.trust_store = Some(Arc::new(store));
        let mut ctx = context_with(MockEvController::new(), settings, true);
        ctx.energy_transfer_mode = Some(EnergyTransferMode::AcSinglePhaseCore);

        let mut message = charging_status(EvseNotification::None);
        if let Body::ChargingStatusRes(res) = &mut message.body {
            res.receipt_required = true;
            res.sa_schedule_tuple_id = 2;
            res.meter_info = Some(MeterInfo {
                meter_id: "METER-1".to_string(),
                meter_reading: Some(1200),
                t_meter: None,
            });
        }

        let (sent, next, _) = expect_send(charging_status_res(&message, &mut ctx));

        let req = sent.payload::<MeteringReceiptReq>().expect("receipt");
        assert_eq!(req.session_id, SESSION);
        assert_eq!(req.sa_schedule_tuple_id, 2);
        assert_eq!(req.meter_info.meter_id, "METER-1");
        assert_eq!(req.signature, Some(vec![0xAB; 64]));
        assert_eq!(next, Next::Expect(MessageKind::MeteringReceiptRes));
    }

    #[test]
    fn test_receipt_without_signing_key_terminates() {
        let mut ctx = context_with(MockEvController::new(), settings(), true);
        let mut message = charging_status(EvseNotification::None);
        if let Body::ChargingStatusRes(res) = &mut message.body {
            res.receipt_required = true;
        }
        assert!(terminated(charging_status_res(&message, &mut ctx)).contains("no signing key"));
    }

    #[test]
    fn test_metering_receipt_res_continues_dc_loop() {
        let mut controller = dc_controller();
        controller.expect_is_charging_loop_active().return_const(true);
        controller.expect_is_charging_complete().return_const(false);
        let mut ctx = dc_context(controller);
        let message = Message::new(
            SESSION,
            MeteringReceiptRes {
                response_code: ResponseCode::Ok,
                evse_status: EvseStatus::default(),
            },
        );

        let (sent, _, timeout) = expect_send(metering_receipt_res(&message, &mut ctx));

        assert_eq!(sent.kind(), MessageKind::CurrentDemandReq);
        assert_eq!(timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_session_stop_marks_complete() {
        let mut ctx = context_with(MockEvController::new(), settings(), false);
        let message = Message::new(
            SESSION,
            SessionStopRes {
                response_code: ResponseCode::Ok,
            },
        );
        assert_eq!(terminated(session_stop_res(&message, &mut ctx)), "Session stopped");
        assert!(ctx.session_complete);
    }
}
