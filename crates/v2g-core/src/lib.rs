//! v2g-core - Core types and traits for V2G charging sessions
//!
//! This crate provides the message model shared by the EVCC (vehicle) and
//! SECC (charging station) roles, the reaction type every protocol state
//! returns, the timing policy, and the narrow interfaces through which the
//! session engine talks to its collaborators (EV/EVSE controllers, trust
//! store, message codec).

pub mod codec;
pub mod controller;
pub mod error;
pub mod messages;
pub mod reaction;
pub mod timing;

pub use codec::{EncodedPayload, JsonCodec, MessageCodec};
pub use controller::{EvController, EvseController, ReceiptSigner, TrustStore};
pub use error::{CodecError, CodecResult, TrustStoreError};
pub use messages::*;
pub use reaction::{Next, Reaction};
pub use timing::{OngoingTimer, TimingPolicy};
