//! Shared validity check for incoming messages

use thiserror::Error;
use v2g_core::{Message, MessageKind, Payload, ResponseCode};

/// Why an incoming message cannot be processed in the current state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expected {expected}, received {actual}")]
    UnexpectedKind {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("{kind} carries response code {code}")]
    FailedResponse { kind: MessageKind, code: ResponseCode },
}

/// Check that `message` is a `T` and, for responses, that it reports success
pub fn is_valid<T: Payload>(message: &Message) -> Result<&T, ValidationError> {
    let payload = message
        .payload::<T>()
        .ok_or(ValidationError::UnexpectedKind {
            expected: T::KIND,
            actual: message.kind(),
        })?;
    match message.response_code() {
        Some(code) if !code.is_ok() => Err(ValidationError::FailedResponse {
            kind: T::KIND,
            code,
        }),
        _ => Ok(payload),
    }
}
