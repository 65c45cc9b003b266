//! v2gd - V2G charging session daemon
//!
//! Runs either role of an ISO 15118-2 session against simulated hardware:
//! - `v2gd evcc`: one charging session as the vehicle
//! - `v2gd secc`: a charging station accepting sessions until Ctrl-C

pub mod config;
pub mod simulator;

pub use config::{ConfigError, EvSimConfig, EvseSimConfig, V2gdConfig};
pub use simulator::{SimulatedEv, SimulatedEvse};
