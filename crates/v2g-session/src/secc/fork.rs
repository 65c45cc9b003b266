//! Fork state: accept any one request kind out of an allowed set

use tracing::{debug, warn};
use v2g_core::{Message, MessageKind, Reaction};

use super::{sequence_error, SeccReaction, SeccState};
use crate::context::SeccContext;

/// One-shot fork over a set of request kinds
///
/// The first allowed message empties the set and is handed to its state.
/// Any later message, allowed or not, gets a sequence error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkState {
    allowed: Vec<MessageKind>,
}

impl ForkState {
    pub fn new(allowed: Vec<MessageKind>) -> Self {
        Self { allowed }
    }

    pub fn allowed(&self) -> &[MessageKind] {
        &self.allowed
    }

    pub fn process_incoming(&mut self, message: &Message, ctx: &SeccContext) -> SeccReaction {
        let kind = message.kind();
        let Some(next_state) = SeccState::for_request(kind) else {
            return Reaction::terminate(format!(
                "Invalid message ({}) at this state (Fork). Allowed messages are: {:?}",
                kind, self.allowed
            ));
        };

        if self.allowed.contains(&kind) {
            debug!(%kind, "Fork resolved");
            self.allowed.clear();
            Reaction::ChangeState {
                message: message.clone(),
                next_state,
            }
        } else {
            warn!(%kind, allowed = ?self.allowed, "Request not allowed at fork");
            sequence_error(&next_state, ctx)
        }
    }
}
