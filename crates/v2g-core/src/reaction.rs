//! Outcome of processing one incoming message

use std::time::Duration;

use crate::messages::{Message, MessageKind};

/// What the session should wait for after a message has been sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Bind the state handling `kind` and wait for it
    Expect(MessageKind),
    /// Bind a fork accepting any one of the listed kinds (SECC only)
    Fork(Vec<MessageKind>),
    /// Keep the current state, e.g. after a sequence error response
    Remain,
    /// The exchange is complete once the message is out
    End,
}

/// Result of `process_incoming`, generic over the role's state type
#[derive(Debug, Clone)]
pub enum Reaction<S> {
    /// Transmit `message`, then wait up to `timeout` for what `next` names
    Send {
        message: Message,
        next: Next,
        timeout: Duration,
    },
    /// Re-dispatch `message` into `next_state` without sending anything
    ChangeState { message: Message, next_state: S },
    /// Abort the session
    Terminate { reason: String },
}

impl<S> Reaction<S> {
    pub fn send(message: Message, next: Next, timeout: Duration) -> Self {
        Reaction::Send {
            message,
            next,
            timeout,
        }
    }

    pub fn terminate(reason: impl Into<String>) -> Self {
        Reaction::Terminate {
            reason: reason.into(),
        }
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, Reaction::Terminate { .. })
    }
}
