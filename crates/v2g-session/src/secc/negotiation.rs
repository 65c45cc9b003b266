//! Application protocol negotiation (first SECC state)

use tracing::{error, info};
use v2g_core::{
    AppProtocol, AppProtocolResponseCode, Body, Message, MessageKind, Next, Reaction,
    SupportedAppProtocolRes,
};

use super::{SeccReaction, SeccState};
use crate::context::SeccContext;

/// Pick the protocol to speak from the EVCC's offer
///
/// Offers are tried in priority order (1 first); the first local protocol
/// with the same namespace and major version wins. A differing minor
/// version still succeeds, with deviation.
pub fn negotiate(
    offered: &[AppProtocol],
    supported: &[AppProtocol],
) -> (AppProtocolResponseCode, Option<AppProtocol>) {
    let mut offered: Vec<&AppProtocol> = offered.iter().collect();
    offered.sort_by_key(|p| p.priority);

    for evcc in offered {
        let matched = supported
            .iter()
            .find(|secc| secc.namespace == evcc.namespace && secc.major == evcc.major);
        if let Some(secc) = matched {
            let code = if secc.minor == evcc.minor {
                AppProtocolResponseCode::SuccessfulNegotiation
            } else {
                AppProtocolResponseCode::SuccessfulNegotiationWithMinorDeviation
            };
            return (code, Some(evcc.clone()));
        }
    }
    (AppProtocolResponseCode::FailedNoNegotiation, None)
}

fn failed(ctx: &SeccContext) -> SeccReaction {
    let res = SupportedAppProtocolRes {
        response_code: AppProtocolResponseCode::FailedNoNegotiation,
        schema_id: None,
    };
    Reaction::send(
        Message::sessionless(res),
        Next::End,
        ctx.timing.sequence_timeout(),
    )
}

pub(super) fn process(message: &Message, ctx: &mut SeccContext) -> SeccReaction {
    match &message.body {
        Body::SupportedAppProtocolReq(req) => {
            let (code, selected) = negotiate(&req.app_protocols, &ctx.settings.supported_protocols);
            let Some(protocol) = selected else {
                error!(offered = ?req.app_protocols, "No common application protocol");
                return failed(ctx);
            };
            info!(
                namespace = %protocol.namespace,
                major = protocol.major,
                minor = protocol.minor,
                schema_id = protocol.schema_id,
                ?code,
                "Application protocol negotiated"
            );
            let res = SupportedAppProtocolRes {
                response_code: code,
                schema_id: Some(protocol.schema_id),
            };
            ctx.negotiated_protocol = Some(protocol);
            Reaction::send(
                Message::sessionless(res),
                Next::Expect(MessageKind::SessionSetupReq),
                ctx.timing.sequence_timeout(),
            )
        }
        Body::SeccDiscoveryReq(_) => Reaction::ChangeState {
            message: message.clone(),
            next_state: SeccState::WaitForSeccDiscoveryReq,
        },
        _ => {
            error!(kind = %message.kind(), "Expected SupportedAppProtocolReq");
            failed(ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use v2g_core::*;

    use super::super::test_support::*;
    use super::*;

    const NS_2010: &str = "urn:iso:15118:2:2010:MsgDef";

    #[rstest]
    // Equal version
    #[case(
        vec![AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 2, 0).with_schema_id(10)],
        AppProtocolResponseCode::SuccessfulNegotiation,
        Some(10)
    )]
    // Minor deviation
    #[case(
        vec![AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 2, 1).with_schema_id(11)],
        AppProtocolResponseCode::SuccessfulNegotiationWithMinorDeviation,
        Some(11)
    )]
    // Highest priority match wins over list order
    #[case(
        vec![
            AppProtocol::new(NS_2010, 1, 0).with_schema_id(9).with_priority(2),
            AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 2, 0).with_schema_id(10).with_priority(1),
        ],
        AppProtocolResponseCode::SuccessfulNegotiation,
        Some(10)
    )]
    // Unsupported major
    #[case(
        vec![AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 3, 0).with_schema_id(12)],
        AppProtocolResponseCode::FailedNoNegotiation,
        None
    )]
    // Unsupported namespace
    #[case(
        vec![AppProtocol::new(NS_2010, 1, 0).with_schema_id(9)],
        AppProtocolResponseCode::FailedNoNegotiation,
        None
    )]
    fn test_negotiate(
        #[case] offered: Vec<AppProtocol>,
        #[case] code: AppProtocolResponseCode,
        #[case] schema_id: Option<u8>,
    ) {
        let supported = vec![AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 2, 0).with_schema_id(10)];
        let (actual, selected) = negotiate(&offered, &supported);
        assert_eq!(actual, code);
        assert_eq!(selected.map(|p| p.schema_id), schema_id);
    }

    #[test]
    fn test_negotiated_protocol_recorded() {
        let mut ctx = context_with(evse_controller(), false);
        let message = Message::sessionless(SupportedAppProtocolReq {
            app_protocols: vec![AppProtocol::new(ISO_15118_2_2013_NAMESPACE, 2, 1).with_schema_id(11)],
        });

        match process(&message, &mut ctx) {
            Reaction::Send { message, next, .. } => {
                let res = message
                    .payload::<SupportedAppProtocolRes>()
                    .expect("app protocol response");
                assert_eq!(
                    res.response_code,
                    AppProtocolResponseCode::SuccessfulNegotiationWithMinorDeviation
                );
                assert_eq!(res.schema_id, Some(11));
                assert_eq!(next, Next::Expect(MessageKind::SessionSetupReq));
            }
            other => panic!("expected Send, got {:?}", other),
        }
        assert_eq!(ctx.negotiated_protocol.map(|p| p.schema_id), Some(11));
    }

    #[test]
    fn test_no_match_ends_session() {
        let mut ctx = context_with(evse_controller(), false);
        let message = Message::sessionless(SupportedAppProtocolReq {
            app_protocols: vec![AppProtocol::new(NS_2010, 1, 0).with_schema_id(9)],
        });

        match process(&message, &mut ctx) {
            Reaction::Send { message, next, .. } => {
                assert_eq!(
                    message.payload::<SupportedAppProtocolRes>().map(|r| r.response_code),
                    Some(AppProtocolResponseCode::FailedNoNegotiation)
                );
                assert_eq!(next, Next::End);
            }
            other => panic!("expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_discovery_request_changes_state() {
        let mut ctx = context_with(evse_controller(), false);
        let message = Message::sessionless(SeccDiscoveryReq {
            security: Security::NoTls,
            transport_protocol: TransportProtocol::Tcp,
        });

        match process(&message, &mut ctx) {
            Reaction::ChangeState { next_state, .. } => {
                assert_eq!(next_state, SeccState::WaitForSeccDiscoveryReq)
            }
            other => panic!("expected ChangeState, got {:?}", other),
        }
    }

    #[test]
    fn test_other_message_fails_negotiation() {
        let mut ctx = context_with(evse_controller(), false);
        let message = Message::new(SESSION, ServiceDiscoveryReq::default());

        match process(&message, &mut ctx) {
            Reaction::Send { message, next, .. } => {
                assert_eq!(message.kind(), MessageKind::SupportedAppProtocolRes);
                assert_eq!(next, Next::End);
            }
            other => panic!("expected Send, got {:?}", other),
        }
    }
}
