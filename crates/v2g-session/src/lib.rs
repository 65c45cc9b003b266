//! v2g-session - Session protocol engine for V2G charging
//!
//! Runs the strict request/response exchange of ISO 15118-2 on top of a
//! [`v2g_transport::MessageTransport`]:
//! - [`evcc`]: vehicle side states, session driver and client
//! - [`secc`]: charging station states (protocol negotiator, fork state),
//!   session driver and accept loop
//!
//! Every state consumes exactly one incoming message and returns a
//! [`v2g_core::Reaction`]. States never fail past their own boundary;
//! `Terminate` is the only way a session ends abnormally.

pub mod config;
pub mod context;
pub mod error;
pub mod evcc;
pub mod secc;
pub mod validation;

pub use config::{EvccConfig, ReceiptSigningConfig, SeccConfig};
pub use context::{EvccContext, EvccSettings, SeccContext, SeccSettings, SessionContext};
pub use error::SessionError;
pub use evcc::{EvccClient, EvccSession, EvccState};
pub use secc::{SeccServer, SeccSession, SeccState};
pub use validation::{is_valid, ValidationError};

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub reason: String,
    /// True for a complete exchange (session stop, negotiated end)
    pub graceful: bool,
}

impl SessionOutcome {
    pub fn graceful(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            graceful: true,
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            graceful: false,
        }
    }
}
