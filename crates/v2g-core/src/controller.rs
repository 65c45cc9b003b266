//! Interfaces to the collaborators the session engine drives
//!
//! The engine only reads present values and targets through these traits;
//! physical control and key management live behind them.

use std::path::Path;
use std::sync::Arc;

use crate::error::TrustStoreError;
use crate::messages::{
    DcEvStatus, EnergyTransferMode, EvseNotification, MeterInfo, PhysicalValue, SessionId,
};

/// Vehicle side physical controller
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait EvController: Send + Sync {
    /// EVCC identifier sent in SessionSetupReq
    fn evcc_id(&self) -> String;

    fn energy_transfer_mode(&self) -> EnergyTransferMode;

    fn target_voltage(&self) -> PhysicalValue;

    fn target_current(&self) -> PhysicalValue;

    fn max_voltage(&self) -> PhysicalValue;

    fn max_current(&self) -> PhysicalValue;

    fn dc_ev_status(&self) -> DcEvStatus;

    /// Apply the maximum current granted by the EVSE
    fn adjust_max_current(&self, value: PhysicalValue);

    /// Whether the EV wants to keep the charging loop running
    fn is_charging_loop_active(&self) -> bool;

    /// Whether the battery reached its target (DC)
    fn is_charging_complete(&self) -> bool;
}

/// Charging station side physical controller
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait EvseController: Send + Sync {
    fn evse_id(&self) -> String;

    /// A new session was established on this outlet
    fn session_started(&self, session_id: SessionId);

    fn supported_energy_transfer_modes(&self) -> Vec<EnergyTransferMode>;

    fn present_voltage(&self) -> PhysicalValue;

    fn present_current(&self) -> PhysicalValue;

    fn max_current(&self) -> PhysicalValue;

    fn is_authorized(&self) -> bool;

    fn is_cable_check_finished(&self) -> bool;

    fn notification(&self) -> EvseNotification;

    fn meter_info(&self) -> MeterInfo;

    /// Whether the EV must send a metering receipt this round
    fn is_receipt_required(&self) -> bool;

    /// Targets requested by the EV during pre-charge and current demand
    fn set_target(&self, voltage: PhysicalValue, current: PhysicalValue);
}

/// Key able to sign metering receipts
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait ReceiptSigner: Send + Sync {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, TrustStoreError>;
}

/// Source of receipt signing keys
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait TrustStore: Send + Sync {
    fn load_private_key(
        &self,
        keystore_path: &Path,
        passphrase: &str,
        alias: &str,
    ) -> Result<Arc<dyn ReceiptSigner>, TrustStoreError>;
}
