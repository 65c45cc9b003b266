//! Daemon configuration
//!
//! One file carries both roles plus the simulated controllers, so the same
//! file can drive `v2gd evcc` and `v2gd secc` against each other. TOML is
//! the default format; `.yaml`/`.yml` files are read as YAML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use v2g_core::EnergyTransferMode;
use v2g_session::{EvccConfig, SeccConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct V2gdConfig {
    #[serde(default)]
    pub evcc: EvccConfig,

    #[serde(default)]
    pub secc: SeccConfig,

    /// Simulated vehicle used in EVCC mode
    #[serde(default)]
    pub ev: EvSimConfig,

    /// Simulated charging station used in SECC mode
    #[serde(default)]
    pub evse: EvseSimConfig,
}

impl V2gdConfig {
    /// Load a TOML or YAML file, chosen by extension
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evcc.app_protocols.is_empty() {
            return Err(ConfigError::Invalid(
                "evcc.app_protocols must offer at least one protocol".to_string(),
            ));
        }
        if self.secc.supported_protocols.is_empty() {
            return Err(ConfigError::Invalid(
                "secc.supported_protocols must list at least one protocol".to_string(),
            ));
        }
        if self.evse.energy_transfer_modes.is_empty() {
            return Err(ConfigError::Invalid(
                "evse.energy_transfer_modes must not be empty".to_string(),
            ));
        }
        if self.ev.initial_soc > 100 || self.ev.target_soc > 100 {
            return Err(ConfigError::Invalid(
                "ev state of charge values are percentages".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Simulated EV
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvSimConfig {
    /// EVCC identifier, usually the MAC address of the PLC modem in hex
    #[serde(default = "default_evcc_id")]
    pub evcc_id: String,

    #[serde(default = "default_ev_mode")]
    pub energy_transfer_mode: EnergyTransferMode,

    /// Maximum voltage in V
    #[serde(default = "default_ev_max_voltage")]
    pub max_voltage: i16,

    /// Maximum current in A
    #[serde(default = "default_ev_max_current")]
    pub max_current: i16,

    /// DC target voltage in V, reached during pre-charge
    #[serde(default = "default_ev_target_voltage")]
    pub target_voltage: i16,

    /// DC target current in A
    #[serde(default = "default_ev_target_current")]
    pub target_current: i16,

    /// State of charge at plug-in (%)
    #[serde(default = "default_initial_soc")]
    pub initial_soc: u8,

    /// State of charge at which DC charging completes (%)
    #[serde(default = "default_target_soc")]
    pub target_soc: u8,

    /// SoC gained per charging loop round (%)
    #[serde(default = "default_soc_step")]
    pub soc_step: u8,

    /// Charging loop rounds before the EV stops on its own
    #[serde(default = "default_charging_rounds")]
    pub charging_rounds: u32,
}

fn default_evcc_id() -> String {
    "0A0B0C0D0E0F".to_string()
}

fn default_ev_mode() -> EnergyTransferMode {
    EnergyTransferMode::AcThreePhaseCore
}

fn default_ev_max_voltage() -> i16 {
    500
}

fn default_ev_max_current() -> i16 {
    32
}

fn default_ev_target_voltage() -> i16 {
    400
}

fn default_ev_target_current() -> i16 {
    20
}

fn default_initial_soc() -> u8 {
    30
}

fn default_target_soc() -> u8 {
    80
}

fn default_soc_step() -> u8 {
    5
}

fn default_charging_rounds() -> u32 {
    10
}

impl Default for EvSimConfig {
    fn default() -> Self {
        Self {
            evcc_id: default_evcc_id(),
            energy_transfer_mode: default_ev_mode(),
            max_voltage: default_ev_max_voltage(),
            max_current: default_ev_max_current(),
            target_voltage: default_ev_target_voltage(),
            target_current: default_ev_target_current(),
            initial_soc: default_initial_soc(),
            target_soc: default_target_soc(),
            soc_step: default_soc_step(),
            charging_rounds: default_charging_rounds(),
        }
    }
}

// =============================================================================
// Simulated EVSE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvseSimConfig {
    #[serde(default = "default_evse_id")]
    pub evse_id: String,

    #[serde(default = "default_evse_modes")]
    pub energy_transfer_modes: Vec<EnergyTransferMode>,

    /// Current granted to the EV in A
    #[serde(default = "default_evse_max_current")]
    pub max_current: i16,

    /// AuthorizationReq rounds answered with Ongoing before Finished
    #[serde(default)]
    pub authorization_rounds: u32,

    /// CableCheckReq rounds answered with Ongoing before Finished
    #[serde(default = "default_cable_check_rounds")]
    pub cable_check_rounds: u32,

    /// Voltage the output moves towards the EV target per pre-charge round (V)
    #[serde(default = "default_voltage_step")]
    pub voltage_step: i16,

    #[serde(default = "default_meter_id")]
    pub meter_id: String,

    /// Energy delivered per charging loop response (Wh)
    #[serde(default = "default_energy_per_round")]
    pub energy_per_round_wh: u64,

    /// Ask the EV for signed metering receipts (TLS only)
    #[serde(default)]
    pub receipt_required: bool,
}

fn default_evse_id() -> String {
    "DE*V2G*E12345".to_string()
}

fn default_evse_modes() -> Vec<EnergyTransferMode> {
    vec![
        EnergyTransferMode::AcThreePhaseCore,
        EnergyTransferMode::DcComboCore,
    ]
}

fn default_evse_max_current() -> i16 {
    32
}

fn default_cable_check_rounds() -> u32 {
    1
}

fn default_voltage_step() -> i16 {
    100
}

fn default_meter_id() -> String {
    "METER-0001".to_string()
}

fn default_energy_per_round() -> u64 {
    50
}

impl Default for EvseSimConfig {
    fn default() -> Self {
        Self {
            evse_id: default_evse_id(),
            energy_transfer_modes: default_evse_modes(),
            max_current: default_evse_max_current(),
            authorization_rounds: 0,
            cable_check_rounds: default_cable_check_rounds(),
            voltage_step: default_voltage_step(),
            meter_id: default_meter_id(),
            energy_per_round_wh: default_energy_per_round(),
            receipt_required: false,
        }
    }
}
