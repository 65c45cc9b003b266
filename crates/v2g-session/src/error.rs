//! Session layer errors
//!
//! Protocol problems inside a running session never surface here; they end
//! the session with a [`crate::SessionOutcome`]. These errors cover setting
//! a session up.

use thiserror::Error;
use v2g_core::TrustStoreError;
use v2g_transport::{ConnectError, TransportError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Trust store error: {0}")]
    TrustStore(#[from] TrustStoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
