//! SECC session driver

use std::sync::Arc;

use tracing::{debug, info, warn};
use v2g_core::{EvseController, Message, Next, Reaction, TimingPolicy};
use v2g_transport::MessageTransport;

use super::{ForkState, SeccState};
use crate::context::{SeccContext, SeccSettings, SessionContext};
use crate::SessionOutcome;

/// One SECC session over an accepted transport
pub struct SeccSession<T> {
    transport: T,
    context: SeccContext,
    state: SeccState,
}

impl<T: MessageTransport> SeccSession<T> {
    pub fn new(
        transport: T,
        controller: Arc<dyn EvseController>,
        settings: Arc<SeccSettings>,
        timing: Arc<TimingPolicy>,
    ) -> Self {
        let is_tls = transport.is_tls();
        Self {
            transport,
            context: SessionContext::new(controller, settings, timing, is_tls),
            state: SeccState::WaitForSupportedAppProtocolReq,
        }
    }

    pub fn state(&self) -> &SeccState {
        &self.state
    }

    /// Serve requests until the exchange ends or the session terminates
    pub async fn run(mut self) -> SessionOutcome {
        let timeout = self.context.timing.sequence_timeout();
        info!(tls = self.context.is_tls, "Starting SECC session");

        loop {
            let mut message = match self.transport.receive(timeout).await {
                Ok(message) => message,
                Err(e) if e.is_timeout() => {
                    let reason = format!("Session timed out waiting for {}", self.awaited());
                    return self.finish(SessionOutcome::aborted(reason)).await;
                }
                Err(e) => {
                    let reason = format!("Transport failure: {}", e);
                    return self.finish(SessionOutcome::aborted(reason)).await;
                }
            };

            let (outgoing, next): (Message, Next) = loop {
                debug!(state = %self.state.name(), kind = %message.kind(), "Processing message");
                match self.state.process_incoming(&message, &mut self.context) {
                    Reaction::ChangeState {
                        message: forwarded,
                        next_state,
                    } => {
                        self.state = next_state;
                        message = forwarded;
                    }
                    Reaction::Send { message, next, .. } => break (message, next),
                    Reaction::Terminate { reason } => {
                        let outcome = SessionOutcome {
                            reason,
                            graceful: self.context.session_complete,
                        };
                        return self.finish(outcome).await;
                    }
                }
            };

            if let Err(e) = self.transport.send(&outgoing, timeout).await {
                let reason = format!("Failed to send {}: {}", outgoing.kind(), e);
                return self.finish(SessionOutcome::aborted(reason)).await;
            }

            match next {
                Next::Expect(kind) => match SeccState::for_request(kind) {
                    Some(state) => self.state = state,
                    None => {
                        let reason = format!("No SECC state handles {}", kind);
                        return self.finish(SessionOutcome::aborted(reason)).await;
                    }
                },
                Next::Fork(kinds) => self.state = SeccState::Fork(ForkState::new(kinds)),
                Next::Remain => {}
                Next::End => {
                    let outcome = SessionOutcome {
                        reason: format!("Session ended after {}", outgoing.kind()),
                        graceful: self.context.session_complete,
                    };
                    return self.finish(outcome).await;
                }
            }
        }
    }

    fn awaited(&self) -> String {
        match (&self.state, self.state.expected()) {
            (SeccState::Fork(fork), _) => format!("any of {:?}", fork.allowed()),
            (_, Some(kind)) => kind.to_string(),
            (state, None) => state.name(),
        }
    }

    async fn finish(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        self.transport.stop().await;
        if outcome.graceful {
            info!(session_id = %self.context.session_id, reason = %outcome.reason, "SECC session finished");
        } else {
            warn!(
                session_id = %self.context.session_id,
                state = %self.state.name(),
                reason = %outcome.reason,
                "SECC session aborted"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use v2g_core::controller::MockEvseController;
    use v2g_core::*;
    use v2g_transport::MockTransport;

    use super::super::test_support::{evse_controller, settings};
    use super::*;

    fn session_over(transport: MockTransport, controller: MockEvseController) -> SeccSession<MockTransport> {
        SeccSession::new(
            transport,
            Arc::new(controller),
            Arc::new(settings()),
            Arc::new(TimingPolicy::default()),
        )
    }

    fn app_protocol_req() -> Message {
        Message::sessionless(SupportedAppProtocolReq {
            app_protocols: vec![AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 2, 0).with_schema_id(10)],
        })
    }

    #[tokio::test]
    async fn test_failed_negotiation_ends_session() {
        let transport = MockTransport::scripted(
            vec![Message::sessionless(SupportedAppProtocolReq {
                app_protocols: vec![AppProtocol::new("urn:din:70121:2012:MsgDef", 2, 0)],
            })],
            false,
        );
        let log = transport.log();

        let outcome = session_over(transport, evse_controller()).run().await;

        assert!(!outcome.graceful);
        assert_eq!(outcome.reason, "Session ended after SupportedAppProtocolRes");
        assert_eq!(log.sent().len(), 1);
        assert_eq!(log.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_sequence_error_keeps_waiting() {
        // ServiceDiscoveryReq before session setup, then nothing more
        let transport = MockTransport::scripted(
            vec![
                app_protocol_req(),
                Message::sessionless(ServiceDiscoveryReq::default()),
            ],
            false,
        );
        let log = transport.log();

        let outcome = session_over(transport, evse_controller()).run().await;

        let sent = log.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].kind(), MessageKind::ServiceDiscoveryRes);
        assert_eq!(sent[1].response_code(), Some(ResponseCode::FailedSequenceError));
        // The queue is drained while still waiting for SessionSetupReq
        assert!(outcome.reason.starts_with("Transport failure"));
    }

    #[tokio::test]
    async fn test_ac_session_until_stop() {
        let mut controller = evse_controller();
        controller.expect_is_authorized().return_const(true);
        controller.expect_is_receipt_required().return_const(false);
        controller
            .expect_notification()
            .return_const(EvseNotification::None);

        // The EVCC end has to echo the generated session id
        let (secc_end, mut evcc_end) = MockTransport::pair(false);
        let secc_log = secc_end.log();
        let task = tokio::spawn(session_over(secc_end, controller).run());
        let wait = std::time::Duration::from_secs(2);

        evcc_end.send(&app_protocol_req(), wait).await.unwrap();
        let res = evcc_end.receive(wait).await.unwrap();
        assert_eq!(res.kind(), MessageKind::SupportedAppProtocolRes);

        evcc_end
            .send(
                &Message::sessionless(SessionSetupReq {
                    evcc_id: "0A0B0C0D0E0F".to_string(),
                }),
                wait,
            )
            .await
            .unwrap();
        let session_id = evcc_end.receive(wait).await.unwrap().session_id;
        assert!(!session_id.is_none());

        let requests: Vec<Body> = vec![
            ServiceDiscoveryReq::default().into(),
            PaymentServiceSelectionReq {
                selected_payment_option: PaymentOption::ExternalPayment,
            }
            .into(),
            AuthorizationReq::default().into(),
            ChargeParameterDiscoveryReq {
                requested_energy_transfer_mode: EnergyTransferMode::AcThreePhaseCore,
                max_voltage: PhysicalValue::volts(400, 0),
                max_current: PhysicalValue::amperes(32, 0),
                dc_ev_status: None,
            }
            .into(),
            PowerDeliveryReq {
                charge_progress: ChargeProgress::Start,
                sa_schedule_tuple_id: 1,
                dc_ev_status: None,
            }
            .into(),
            ChargingStatusReq::default().into(),
            PowerDeliveryReq {
                charge_progress: ChargeProgress::Stop,
                sa_schedule_tuple_id: 1,
                dc_ev_status: None,
            }
            .into(),
            SessionStopReq {
                charging_session: ChargingSession::Terminate,
            }
            .into(),
        ];
        for body in requests {
            let request = Message::new(session_id, body);
            evcc_end.send(&request, wait).await.unwrap();
            let response = evcc_end.receive(wait).await.unwrap();
            assert_eq!(response.kind(), request.kind().response_kind());
            assert_eq!(response.response_code(), Some(ResponseCode::Ok));
        }

        let outcome = task.await.unwrap();
        assert_eq!(
            outcome,
            SessionOutcome::graceful("Session ended after SessionStopRes")
        );
        assert_eq!(secc_log.stop_calls(), 1);
    }
}
