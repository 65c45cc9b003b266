//! EVCC session driver
//!
//! Sends the opening SupportedAppProtocolReq, then feeds every response
//! into the current state until a state terminates the session.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use v2g_core::{EvController, Next, Reaction, TimingPolicy};
use v2g_transport::MessageTransport;

use super::{supported_app_protocol_req, EvccState};
use crate::context::{EvccContext, EvccSettings, SessionContext};
use crate::SessionOutcome;

/// One EVCC session over an established transport
pub struct EvccSession<T> {
    transport: T,
    context: EvccContext,
    state: EvccState,
}

impl<T: MessageTransport> EvccSession<T> {
    pub fn new(
        transport: T,
        controller: Arc<dyn EvController>,
        settings: Arc<EvccSettings>,
        timing: Arc<TimingPolicy>,
    ) -> Self {
        let is_tls = transport.is_tls();
        Self {
            transport,
            context: SessionContext::new(controller, settings, timing, is_tls),
            state: EvccState::WaitForSupportedAppProtocolRes,
        }
    }

    pub fn state(&self) -> EvccState {
        self.state
    }

    pub fn context(&self) -> &EvccContext {
        &self.context
    }

    /// Run the session to completion and close the transport
    pub async fn run(mut self) -> SessionOutcome {
        let timing = self.context.timing.clone();
        let setup_deadline = Instant::now() + timing.communication_setup_timeout();

        let opening = supported_app_protocol_req(&self.context);
        let mut timeout = timing.timeout_for(self.state.expected());
        info!(
            tls = self.context.is_tls,
            protocols = self.context.settings.app_protocols.len(),
            "Starting EVCC session"
        );
        if let Err(e) = self.transport.send(&opening, timeout).await {
            let reason = format!("Failed to send {}: {}", opening.kind(), e);
            return self.finish(SessionOutcome::aborted(reason)).await;
        }

        loop {
            // Communication setup must complete before the deadline
            let in_setup = self.context.session_id.is_none();
            let wait = if in_setup {
                timeout.min(setup_deadline.saturating_duration_since(Instant::now()))
            } else {
                timeout
            };

            let mut message = match self.transport.receive(wait).await {
                Ok(message) => message,
                Err(e) if e.is_timeout() => {
                    let reason = if in_setup && Instant::now() >= setup_deadline {
                        format!(
                            "Communication setup timed out waiting for {}",
                            self.state.expected()
                        )
                    } else {
                        format!("Session timed out waiting for {}", self.state.expected())
                    };
                    return self.finish(SessionOutcome::aborted(reason)).await;
                }
                Err(e) => {
                    let reason = format!("Transport failure: {}", e);
                    return self.finish(SessionOutcome::aborted(reason)).await;
                }
            };

            let (outgoing, next, next_timeout) = loop {
                debug!(state = ?self.state, kind = %message.kind(), "Processing message");
                match self.state.process_incoming(&message, &mut self.context) {
                    Reaction::ChangeState {
                        message: forwarded,
                        next_state,
                    } => {
                        self.state = next_state;
                        message = forwarded;
                    }
                    Reaction::Send {
                        message,
                        next,
                        timeout,
                    } => break (message, next, timeout),
                    Reaction::Terminate { reason } => {
                        let outcome = SessionOutcome {
                            reason,
                            graceful: self.context.session_complete,
                        };
                        return self.finish(outcome).await;
                    }
                }
            };

            if let Err(e) = self.transport.send(&outgoing, next_timeout).await {
                let reason = format!("Failed to send {}: {}", outgoing.kind(), e);
                return self.finish(SessionOutcome::aborted(reason)).await;
            }
            match next {
                Next::Expect(kind) => match EvccState::for_response(kind) {
                    Some(state) => self.state = state,
                    None => {
                        let reason = format!("No EVCC state handles {}", kind);
                        return self.finish(SessionOutcome::aborted(reason)).await;
                    }
                },
                Next::Remain => {}
                Next::End => {
                    return self
                        .finish(SessionOutcome::graceful("Exchange complete"))
                        .await;
                }
                Next::Fork(kinds) => {
                    let reason = format!("EVCC cannot wait for any of {:?}", kinds);
                    return self.finish(SessionOutcome::aborted(reason)).await;
                }
            }
            timeout = next_timeout;
        }
    }

    async fn finish(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        self.transport.stop().await;
        if outcome.graceful {
            info!(session_id = %self.context.session_id, reason = %outcome.reason, "EVCC session finished");
        } else {
            warn!(
                session_id = %self.context.session_id,
                state = ?self.state,
                reason = %outcome.reason,
                "EVCC session aborted"
            );
        }
        outcome
    }
}
